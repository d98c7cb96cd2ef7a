//! Turning weights into bucket ranges and hashes into assignments.

use crate::hash::{hash, HashVersion};
use crate::types::value::{is_truthy, to_js_string};
use crate::types::{Attributes, ConfigError, Exclusion, Range, Variant};

/// `n` equal weights summing to one.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn equal_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    vec![1.0 / n as f64; n]
}

/// Lay weighted variants out over `[0, 1]`.
///
/// Weights are normalized to sum to one. Variant `i` then occupies
/// `[c, c + coverage * w_i)` where `c` is the sum of the weights before it, so
/// ranges stay put when coverage grows. Coverage is clamped to `[0, 1]` and so
/// is every bound, which absorbs float drift in the running sum.
///
/// # Errors
///
/// Returns [`ConfigError`] for NaN coverage or for weights that are negative,
/// non-finite or sum to zero.
pub fn build_ranges(weights: &[f64], coverage: f64) -> Result<Vec<Range>, ConfigError> {
    if coverage.is_nan() {
        return Err(ConfigError::InvalidCoverage(coverage));
    }
    let coverage = coverage.clamp(0.0, 1.0);
    if weights.is_empty() {
        return Ok(Vec::new());
    }

    let total: f64 = weights.iter().sum();
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || total <= 0.0 {
        return Err(ConfigError::InvalidWeights {
            weights: weights.to_vec(),
        });
    }

    let mut cumulative = 0.0;
    Ok(weights
        .iter()
        .map(|&w| {
            let w = w / total;
            let start = f64::min(cumulative, 1.0);
            cumulative += w;
            Range::new(start, f64::min(start + coverage * w, 1.0))
        })
        .collect())
}

#[must_use]
pub fn in_range(n: f64, range: &Range) -> bool {
    range.contains(n)
}

/// Index of the first variant with a range containing `n`.
#[must_use]
pub fn choose_variant(n: f64, variants: &[Variant]) -> Option<usize> {
    variants
        .iter()
        .position(|variant| variant.ranges.iter().any(|range| range.contains(n)))
}

/// The string hashed for `attribute`. Absent and falsy values hash as `""`.
#[must_use]
pub fn hash_value(attributes: &Attributes, attribute: &str) -> String {
    match attributes.get(attribute) {
        value @ Some(v) if is_truthy(value) => to_js_string(v),
        _ => String::new(),
    }
}

/// True if any exclusion claims the user.
///
/// Exclusions without their own attribute or hash version inherit the
/// experiment's.
#[must_use]
pub fn is_excluded(
    attributes: &Attributes,
    hash_attribute: &str,
    hash_version: HashVersion,
    exclusions: &[Exclusion],
) -> bool {
    exclusions.iter().any(|exclusion| {
        let attribute = exclusion.attribute.as_deref().unwrap_or(hash_attribute);
        let value = hash_value(attributes, attribute);
        let n = hash(
            &exclusion.seed,
            &value,
            exclusion.hash_version.unwrap_or(hash_version),
        );
        exclusion.ranges.iter().any(|range| range.contains(n))
    })
}
