use serde_json::Value;

use super::condition::Condition;
use super::error::ConfigError;
use super::rule::{Exclusion, Range, Variant};
use crate::bucket::{build_ranges, equal_weights};
use crate::hash::HashVersion;

/// Attribute hashed when an experiment names none.
pub const DEFAULT_HASH_ATTRIBUTE: &str = "id";

/// A randomized experiment: users are hashed into variant ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub key: String,
    pub variants: Vec<Variant>,
    /// Hash seed; the key is used when absent.
    pub seed: Option<String>,
    pub hash_attribute: String,
    pub hash_version: HashVersion,
    pub exclusions: Vec<Exclusion>,
    pub condition: Option<Condition>,
    /// Inactive experiments assign nobody.
    pub active: bool,
    /// Assign everyone eligible to this variant without tracking.
    pub force: Option<usize>,
    /// Emit exposures for hashed assignments.
    pub tracks: bool,
    pub name: Option<String>,
    pub phase: Option<String>,
}

impl Experiment {
    #[must_use]
    pub fn new(key: impl Into<String>, variants: Vec<Variant>) -> Self {
        Self {
            key: key.into(),
            variants,
            seed: None,
            hash_attribute: DEFAULT_HASH_ATTRIBUTE.to_owned(),
            hash_version: HashVersion::V1,
            exclusions: Vec::new(),
            condition: None,
            active: true,
            force: None,
            tracks: true,
            name: None,
            phase: None,
        }
    }

    /// Build an experiment from variation values and weights.
    ///
    /// `weights` of `None` splits traffic evenly. `coverage` is the share of
    /// eligible users that enter at all.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the weights or coverage are unusable.
    pub fn from_legacy<V: Into<Value>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
        weights: Option<&[f64]>,
        coverage: f64,
    ) -> Result<Self, ConfigError> {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let ranges = match weights {
            Some(weights) if weights.len() != values.len() => {
                return Err(ConfigError::WeightCountMismatch {
                    weights: weights.len(),
                    variants: values.len(),
                })
            }
            Some(weights) => build_ranges(weights, coverage)?,
            None => build_ranges(&equal_weights(values.len()), coverage)?,
        };
        let variants = values
            .into_iter()
            .zip(ranges)
            .map(|(value, range)| Variant::new(value, vec![range]))
            .collect();
        Ok(Self::new(key, variants))
    }

    #[must_use]
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    #[must_use]
    pub fn with_hash_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.hash_attribute = attribute.into();
        self
    }

    #[must_use]
    pub fn with_hash_version(mut self, version: HashVersion) -> Self {
        self.hash_version = version;
        self
    }

    #[must_use]
    pub fn with_exclusion(mut self, exclusion: Exclusion) -> Self {
        self.exclusions.push(exclusion);
        self
    }

    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    #[must_use]
    pub fn forced(mut self, variation: usize) -> Self {
        self.force = Some(variation);
        self
    }

    #[must_use]
    pub fn untracked(mut self) -> Self {
        self.tracks = false;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// The hash seed actually used.
    #[must_use]
    pub fn hash_seed(&self) -> &str {
        self.seed.as_deref().unwrap_or(&self.key)
    }

    /// Whether a hashed assignment is reported as an exposure.
    #[must_use]
    pub fn should_track(&self) -> bool {
        self.tracks && self.exclusions.iter().all(|ex| ex.should_track)
    }

    /// Check that every range is within `[0, 1]` and no two overlap.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ranges: Vec<Range> = Vec::new();
        for range in self.variants.iter().flat_map(|v| v.ranges.iter()) {
            if !range.is_valid() {
                return Err(ConfigError::InvalidRange {
                    start: range.start,
                    end: range.end,
                });
            }
            if range.width() > 0.0 {
                ranges.push(*range);
            }
        }
        if let Some(bad) = self
            .exclusions
            .iter()
            .flat_map(|ex| ex.ranges.iter())
            .find(|r| !r.is_valid())
        {
            return Err(ConfigError::InvalidRange {
                start: bad.start,
                end: bad.end,
            });
        }

        ranges.sort_by(|a, b| a.start.total_cmp(&b.start));
        if ranges.windows(2).any(|pair| pair[1].start < pair[0].end) {
            return Err(ConfigError::OverlappingRanges {
                experiment: self.key.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults() {
        let exp = Experiment::new("checkout", vec![]);
        assert_eq!(exp.hash_attribute, "id");
        assert_eq!(exp.hash_version, HashVersion::V1);
        assert_eq!(exp.hash_seed(), "checkout");
        assert!(exp.active);
        assert!(exp.tracks);
        assert!(exp.should_track());
    }

    #[test]
    fn seed_overrides_key() {
        let exp = Experiment::new("checkout", vec![]).with_seed("s1");
        assert_eq!(exp.hash_seed(), "s1");
    }

    #[test]
    fn untracked_exclusion_disables_tracking() {
        let exp = Experiment::new("e", vec![])
            .with_exclusion(Exclusion::new("other", vec![Range::new(0.0, 0.1)]).untracked());
        assert!(!exp.should_track());
    }

    #[test]
    fn legacy_builds_ranges() {
        let exp = Experiment::from_legacy("e", [json!("a"), json!("b")], Some(&[0.25, 0.75]), 0.5)
            .unwrap();
        assert_eq!(exp.variants[0].ranges, vec![Range::new(0.0, 0.125)]);
        assert_eq!(exp.variants[1].ranges, vec![Range::new(0.25, 0.625)]);
        assert!(exp.validate().is_ok());
    }

    #[test]
    fn legacy_rejects_count_mismatch() {
        let err = Experiment::from_legacy("e", [1, 2], Some(&[1.0]), 1.0).unwrap_err();
        assert_eq!(
            err,
            ConfigError::WeightCountMismatch {
                weights: 1,
                variants: 2
            }
        );
    }

    #[test]
    fn validate_rejects_overlap() {
        let exp = Experiment::new(
            "e",
            vec![
                Variant::new(0, vec![Range::new(0.0, 0.6)]),
                Variant::new(1, vec![Range::new(0.5, 1.0)]),
            ],
        );
        assert_eq!(
            exp.validate(),
            Err(ConfigError::OverlappingRanges {
                experiment: "e".into()
            })
        );
    }

    #[test]
    fn validate_rejects_out_of_bounds() {
        let exp = Experiment::new("e", vec![Variant::new(0, vec![Range::new(0.5, 1.2)])]);
        assert!(matches!(
            exp.validate(),
            Err(ConfigError::InvalidRange { .. })
        ));
    }

    #[test]
    fn validate_allows_touching_and_empty_ranges() {
        let exp = Experiment::new(
            "e",
            vec![
                Variant::new(0, vec![Range::new(0.0, 0.5)]),
                Variant::new(1, vec![Range::new(0.5, 1.0), Range::new(0.5, 0.5)]),
            ],
        );
        assert!(exp.validate().is_ok());
    }
}
