use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::bucket::{build_ranges, equal_weights};
use crate::hash::HashVersion;
use crate::parse::{parse_condition, RawExclusion, RawFeatureDefinition, RawFeatureRule};
use crate::types::DEFAULT_HASH_ATTRIBUTE;
use crate::{
    ConfigError, Exclusion, Experiment, FeatureDefinition, FeatureDefinitions, FeatureRule, Range,
    Rollout, RuleKind, Variant,
};

/// Compile a raw `features` object. Never fails: a feature whose definition
/// is not an object gets a null default and no rules, and bad rules are
/// dropped.
pub(crate) fn compile_features(raw: Map<String, Value>) -> FeatureDefinitions {
    let mut features = HashMap::with_capacity(raw.len());
    let mut skipped_rules = 0;

    for (key, value) in raw {
        let definition: RawFeatureDefinition = match serde_json::from_value(value) {
            Ok(definition) => definition,
            Err(err) => {
                tracing::warn!(feature = %key, error = %err, "invalid feature definition; serving null");
                features.insert(key, FeatureDefinition::default());
                continue;
            }
        };

        let mut rules = Vec::with_capacity(definition.rules.len());
        for (index, rule) in definition.rules.into_iter().enumerate() {
            match compile_rule(&key, index, rule) {
                Ok(Some(rule)) => rules.push(rule),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(feature = %key, rule = index, error = %err, "skipping unusable rule");
                    skipped_rules += 1;
                }
            }
        }

        features.insert(
            key,
            FeatureDefinition {
                default_value: definition.default_value,
                rules,
            },
        );
    }

    tracing::debug!(
        features = features.len(),
        skipped_rules,
        "compiled feature definitions"
    );
    FeatureDefinitions {
        features,
        skipped_rules,
    }
}

/// Lower one raw rule. `Ok(None)` means the rule has nothing to do (no force
/// value and no variations) and is dropped silently.
fn compile_rule(
    feature: &str,
    index: usize,
    raw: Value,
) -> Result<Option<FeatureRule>, ConfigError> {
    let raw: RawFeatureRule =
        serde_json::from_value(raw).map_err(|err| ConfigError::InvalidRule {
            feature: feature.to_owned(),
            rule: format!("#{index}"),
            reason: err.to_string(),
        })?;

    let condition = raw.condition.as_ref().map(parse_condition);
    let id = raw.id.clone().unwrap_or_default();

    let kind = if raw.variants.is_some() || raw.variations.is_some() {
        RuleKind::Experiment(Arc::new(compile_experiment(feature, &raw)?))
    } else if let Some(value) = raw.force.clone() {
        RuleKind::Force {
            value,
            rollout: compile_rollout(feature, &raw)?,
        }
    } else {
        tracing::debug!(feature, rule = index, "rule has no force value or variations");
        return Ok(None);
    };

    Ok(Some(FeatureRule {
        id,
        condition,
        kind,
    }))
}

fn hash_version(version: Option<u64>) -> Result<HashVersion, ConfigError> {
    version.map_or(Ok(HashVersion::V1), HashVersion::try_from)
}

fn hash_attribute(raw: &RawFeatureRule) -> String {
    raw.hash_attribute
        .clone()
        .unwrap_or_else(|| DEFAULT_HASH_ATTRIBUTE.to_owned())
}

fn compile_experiment(feature: &str, raw: &RawFeatureRule) -> Result<Experiment, ConfigError> {
    let variants = match (&raw.variants, &raw.variations) {
        (Some(variants), _) => variants
            .iter()
            .map(|v| Variant {
                value: v.value.clone(),
                ranges: v.ranges.iter().copied().map(Range::from).collect(),
                key: v.key.clone(),
                name: v.name.clone(),
            })
            .collect(),
        (None, Some(values)) => legacy_variants(values, raw)?,
        (None, None) => Vec::new(),
    };

    let mut exclusions = raw
        .exclusions
        .iter()
        .flatten()
        .map(compile_exclusion)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some((id, start, end)) = &raw.namespace {
        let range = Range::new(*start, *end);
        if !range.is_valid() {
            return Err(ConfigError::InvalidRange {
                start: *start,
                end: *end,
            });
        }
        exclusions.push(Exclusion::namespace(id, *start, *end));
    }

    let experiment = Experiment {
        key: raw.key.clone().unwrap_or_else(|| feature.to_owned()),
        variants,
        seed: raw.seed.clone(),
        hash_attribute: hash_attribute(raw),
        hash_version: hash_version(raw.hash_version)?,
        exclusions,
        condition: None,
        active: true,
        force: None,
        tracks: raw.tracks.unwrap_or(true),
        name: raw.name.clone(),
        phase: raw.phase.clone(),
    };
    experiment.validate()?;
    Ok(experiment)
}

/// `variations` plus either explicit `ranges` or `weights` and `coverage`.
fn legacy_variants(values: &[Value], raw: &RawFeatureRule) -> Result<Vec<Variant>, ConfigError> {
    let ranges: Vec<Range> = if let Some(ranges) = &raw.ranges {
        if ranges.len() != values.len() {
            return Err(ConfigError::RangeCountMismatch {
                ranges: ranges.len(),
                variants: values.len(),
            });
        }
        ranges.iter().copied().map(Range::from).collect()
    } else {
        let weights = raw
            .weights
            .clone()
            .unwrap_or_else(|| equal_weights(values.len()));
        if weights.len() != values.len() {
            return Err(ConfigError::WeightCountMismatch {
                weights: weights.len(),
                variants: values.len(),
            });
        }
        build_ranges(&weights, raw.coverage.unwrap_or(1.0))?
    };

    Ok(values
        .iter()
        .zip(ranges)
        .map(|(value, range)| Variant::new(value.clone(), vec![range]))
        .collect())
}

fn compile_exclusion(raw: &RawExclusion) -> Result<Exclusion, ConfigError> {
    Ok(Exclusion {
        seed: raw.seed.clone(),
        ranges: raw.ranges.iter().copied().map(Range::from).collect(),
        attribute: raw.attribute.clone(),
        hash_version: raw.hash_version.map(HashVersion::try_from).transpose()?,
        should_track: raw.should_track.unwrap_or(true),
    })
}

/// A force rule is gated by `range`, or by `coverage` which means `[0, coverage)`.
fn compile_rollout(feature: &str, raw: &RawFeatureRule) -> Result<Option<Rollout>, ConfigError> {
    let range = match (raw.range, raw.coverage) {
        (Some((start, end)), _) => Range::new(start, end),
        (None, Some(coverage)) if coverage.is_nan() => {
            return Err(ConfigError::InvalidCoverage(coverage))
        }
        (None, Some(coverage)) => Range::new(0.0, coverage.clamp(0.0, 1.0)),
        (None, None) => return Ok(None),
    };
    if !range.is_valid() {
        return Err(ConfigError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    Ok(Some(Rollout {
        seed: raw.seed.clone().unwrap_or_else(|| feature.to_owned()),
        hash_attribute: hash_attribute(raw),
        hash_version: hash_version(raw.hash_version)?,
        range,
    }))
}
