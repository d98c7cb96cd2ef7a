use thiserror::Error;

/// A feature or experiment definition that cannot be used as written.
///
/// Payload loading drops the offending rule and logs this; the programmatic
/// builders return it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid weights {weights:?}: must be finite, non-negative and sum to more than zero")]
    InvalidWeights { weights: Vec<f64> },

    #[error("{weights} weights given for {variants} variations")]
    WeightCountMismatch { weights: usize, variants: usize },

    #[error("{ranges} ranges given for {variants} variations")]
    RangeCountMismatch { ranges: usize, variants: usize },

    #[error("coverage {0} is not a number")]
    InvalidCoverage(f64),

    #[error("invalid range [{start}, {end}): bounds must satisfy 0 <= start <= end <= 1")]
    InvalidRange { start: f64, end: f64 },

    #[error("variation ranges overlap in experiment '{experiment}'")]
    OverlappingRanges { experiment: String },

    #[error("unsupported hash version {0}")]
    UnsupportedHashVersion(u64),

    #[error("invalid rule '{rule}' in feature '{feature}': {reason}")]
    InvalidRule {
        feature: String,
        rule: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_weights_message() {
        let err = ConfigError::InvalidWeights {
            weights: vec![-1.0, 2.0],
        };
        assert_eq!(
            err.to_string(),
            "invalid weights [-1.0, 2.0]: must be finite, non-negative and sum to more than zero"
        );
    }

    #[test]
    fn weight_count_mismatch_message() {
        let err = ConfigError::WeightCountMismatch {
            weights: 3,
            variants: 2,
        };
        assert_eq!(err.to_string(), "3 weights given for 2 variations");
    }

    #[test]
    fn invalid_range_message() {
        let err = ConfigError::InvalidRange {
            start: 0.5,
            end: 0.25,
        };
        assert_eq!(
            err.to_string(),
            "invalid range [0.5, 0.25): bounds must satisfy 0 <= start <= end <= 1"
        );
    }

    #[test]
    fn overlapping_ranges_message() {
        let err = ConfigError::OverlappingRanges {
            experiment: "checkout".into(),
        };
        assert_eq!(
            err.to_string(),
            "variation ranges overlap in experiment 'checkout'"
        );
    }

    #[test]
    fn unsupported_hash_version_message() {
        assert_eq!(
            ConfigError::UnsupportedHashVersion(3).to_string(),
            "unsupported hash version 3"
        );
    }

    #[test]
    fn invalid_rule_message() {
        let err = ConfigError::InvalidRule {
            feature: "banner".into(),
            rule: "#2".into(),
            reason: "invalid type: string, expected a sequence".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid rule '#2' in feature 'banner': invalid type: string, expected a sequence"
        );
    }
}
