mod condition;

use std::sync::Arc;

use serde_json::Value;

pub use condition::eval_condition;

use crate::bucket::{choose_variant, hash_value, is_excluded};
use crate::hash::hash;
use crate::{
    Context, Experiment, ExperimentResult, FeatureDefinitions, FeatureResult, FeatureSource,
    RuleKind,
};

/// Receives experiment assignments that should be reported.
///
/// The engine only calls this for hashed assignments of tracked experiments;
/// deduplication is the sink's business.
pub trait ExposureSink {
    fn record(&self, experiment: &Experiment, result: &ExperimentResult);
}

/// Discards exposures.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ExposureSink for NoopSink {
    fn record(&self, _experiment: &Experiment, _result: &ExperimentResult) {}
}

/// How an experiment assignment was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assignment {
    Excluded,
    Override,
    Forced,
    Hashed,
}

/// Resolves features and runs experiments against one snapshot and context.
///
/// Borrowing both keeps evaluation lock-free: callers grab `Arc`s to the
/// current snapshot and context and evaluate against those.
pub struct RuleEngine<'a> {
    features: &'a FeatureDefinitions,
    context: &'a Context,
    sink: &'a dyn ExposureSink,
}

impl<'a> RuleEngine<'a> {
    #[must_use]
    pub fn new(
        features: &'a FeatureDefinitions,
        context: &'a Context,
        sink: &'a dyn ExposureSink,
    ) -> Self {
        Self {
            features,
            context,
            sink,
        }
    }

    /// Resolve a feature: the first rule that applies wins, otherwise the
    /// default value.
    pub fn evaluate_feature(&self, key: &str) -> FeatureResult {
        let Some(feature) = self.features.get(key) else {
            return FeatureResult::new(Value::Null, FeatureSource::UnknownFeature);
        };
        if !self.context.enabled {
            return FeatureResult::new(feature.default_value.clone(), FeatureSource::DefaultValue);
        }

        let attributes = &self.context.attributes;
        for rule in &feature.rules {
            if let Some(condition) = &rule.condition {
                if !eval_condition(condition, attributes) {
                    continue;
                }
            }

            match &rule.kind {
                RuleKind::Force { value, rollout } => {
                    if let Some(rollout) = rollout {
                        let unit = hash_value(attributes, &rollout.hash_attribute);
                        if unit.is_empty() {
                            continue;
                        }
                        let n = hash(&rollout.seed, &unit, rollout.hash_version);
                        if !rollout.range.contains(n) {
                            continue;
                        }
                    }
                    return FeatureResult::new(value.clone(), FeatureSource::Force)
                        .with_rule_id(&rule.id);
                }
                RuleKind::Experiment(experiment) => {
                    let (result, assignment) = self.assign(experiment, Some(key));
                    if !result.in_experiment {
                        continue;
                    }
                    let source = if assignment == Assignment::Override {
                        FeatureSource::Override
                    } else {
                        FeatureSource::Experiment
                    };
                    return FeatureResult::new(result.value.clone(), source)
                        .with_rule_id(&rule.id)
                        .with_experiment(Arc::clone(experiment), result);
                }
            }
        }

        FeatureResult::new(feature.default_value.clone(), FeatureSource::DefaultValue)
    }

    /// Assign the user to a variant of a stand-alone experiment.
    pub fn run_experiment(&self, experiment: &Experiment) -> ExperimentResult {
        self.assign(experiment, None).0
    }

    fn assign(&self, experiment: &Experiment, feature: Option<&str>) -> (ExperimentResult, Assignment) {
        let attributes = &self.context.attributes;
        let hash_value = hash_value(attributes, &experiment.hash_attribute);
        let outcome = Outcome {
            experiment,
            feature,
            hash_value,
        };

        if experiment.variants.len() < 2 || !self.context.enabled {
            return (outcome.excluded(), Assignment::Excluded);
        }

        if let Some(&forced) = self.context.forced_variations.get(&experiment.key) {
            if forced < experiment.variants.len() {
                return (
                    outcome.assigned(forced, false, None),
                    Assignment::Override,
                );
            }
            return (outcome.excluded(), Assignment::Excluded);
        }

        if !experiment.active {
            return (outcome.excluded(), Assignment::Excluded);
        }
        if let Some(condition) = &experiment.condition {
            if !eval_condition(condition, attributes) {
                return (outcome.excluded(), Assignment::Excluded);
            }
        }
        if is_excluded(
            attributes,
            &experiment.hash_attribute,
            experiment.hash_version,
            &experiment.exclusions,
        ) {
            return (outcome.excluded(), Assignment::Excluded);
        }

        let n = hash(
            experiment.hash_seed(),
            &outcome.hash_value,
            experiment.hash_version,
        );
        let Some(variation) = choose_variant(n, &experiment.variants) else {
            return (outcome.excluded(), Assignment::Excluded);
        };

        if let Some(forced) = experiment.force {
            if forced < experiment.variants.len() {
                return (outcome.assigned(forced, false, None), Assignment::Forced);
            }
            return (outcome.excluded(), Assignment::Excluded);
        }
        if self.context.qa_mode {
            return (outcome.excluded(), Assignment::Excluded);
        }

        let result = outcome.assigned(variation, true, Some(n));
        if experiment.should_track() {
            self.sink.record(experiment, &result);
        }
        (result, Assignment::Hashed)
    }
}

/// Shared pieces of every result for one experiment run.
struct Outcome<'e> {
    experiment: &'e Experiment,
    feature: Option<&'e str>,
    hash_value: String,
}

impl Outcome<'_> {
    fn excluded(self) -> ExperimentResult {
        let mut result = self.assigned(0, false, None);
        result.in_experiment = false;
        result
    }

    fn assigned(self, variation: usize, hash_used: bool, bucket: Option<f64>) -> ExperimentResult {
        let variant = self.experiment.variants.get(variation);
        ExperimentResult {
            value: variant.map_or(Value::Null, |v| v.value.clone()),
            variation,
            key: variant
                .and_then(|v| v.key.clone())
                .unwrap_or_else(|| variation.to_string()),
            name: variant.and_then(|v| v.name.clone()),
            in_experiment: true,
            hash_used,
            hash_attribute: self.experiment.hash_attribute.clone(),
            hash_value: self.hash_value,
            feature_id: self.feature.map(str::to_owned),
            bucket,
        }
    }
}

/// Evaluate one feature without recording exposures.
pub fn evaluate_feature(
    features: &FeatureDefinitions,
    context: &Context,
    key: &str,
) -> FeatureResult {
    RuleEngine::new(features, context, &NoopSink).evaluate_feature(key)
}

/// Run one experiment without recording exposures.
pub fn run_experiment(context: &Context, experiment: &Experiment) -> ExperimentResult {
    let features = FeatureDefinitions::default();
    RuleEngine::new(&features, context, &NoopSink).run_experiment(experiment)
}
