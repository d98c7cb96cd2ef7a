use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

use super::error::ConfigError;
use super::rule::{FeatureRule, RuleKind};

/// A feature's default value and its ordered rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureDefinition {
    pub default_value: Value,
    pub rules: Vec<FeatureRule>,
}

/// Builder for constructing [`FeatureDefinitions`] in code.
///
/// # Example
///
/// ```
/// use gatekeep::{FeatureRule, FeatureSetBuilder, field};
///
/// let features = FeatureSetBuilder::new()
///     .feature("dark-mode", |f| {
///         f.default_value(false)
///             .rule(FeatureRule::force(true).when(field("plan").equals("pro")))
///     })
///     .build()
///     .unwrap();
/// assert_eq!(features.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct FeatureSetBuilder {
    features: Vec<(String, FeatureDefinition)>,
}

/// Intermediate builder passed to the feature definition closure.
#[derive(Debug, Default)]
pub struct FeatureBuilder {
    definition: FeatureDefinition,
}

impl FeatureSetBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a feature. A later definition with the same key replaces it.
    #[must_use]
    pub fn feature(mut self, key: &str, f: impl FnOnce(FeatureBuilder) -> FeatureBuilder) -> Self {
        let builder = f(FeatureBuilder::default());
        self.features.push((key.to_owned(), builder.definition));
        self
    }

    /// Validate every experiment and produce an immutable snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for the first experiment with unusable ranges.
    pub fn build(self) -> Result<FeatureDefinitions, ConfigError> {
        for (_, definition) in &self.features {
            for rule in &definition.rules {
                if let RuleKind::Experiment(experiment) = &rule.kind {
                    experiment.validate()?;
                }
            }
        }
        Ok(FeatureDefinitions {
            features: self.features.into_iter().collect(),
            skipped_rules: 0,
        })
    }
}

impl FeatureBuilder {
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.definition.default_value = value.into();
        self
    }

    /// Append a rule. Rules are checked in the order they are added.
    #[must_use]
    pub fn rule(mut self, rule: FeatureRule) -> Self {
        self.definition.rules.push(rule);
        self
    }
}

/// An immutable snapshot of every known feature.
///
/// Cheap to share behind `Arc`; the client swaps whole snapshots rather than
/// editing one in place.
#[derive(Debug, Clone, Default)]
pub struct FeatureDefinitions {
    pub(crate) features: HashMap<String, FeatureDefinition>,
    pub(crate) skipped_rules: usize,
}

impl FeatureDefinitions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a `features` payload object (`{"key": {"defaultValue": ..., "rules": [...]}}`).
    ///
    /// Rules that cannot be used are dropped with a warning and counted in
    /// [`skipped_rules`](Self::skipped_rules).
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a JSON object.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let raw: Map<String, Value> = serde_json::from_str(json)?;
        Ok(crate::compile::compile_features(raw))
    }

    /// Same as [`from_json`](Self::from_json) for an already parsed value.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a JSON object.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let raw: Map<String, Value> = serde_json::from_value(value)?;
        Ok(crate::compile::compile_features(raw))
    }

    /// Read a JSON payload file and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`GatekeepError`](crate::GatekeepError) on I/O or JSON failure.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::GatekeepError> {
        let input = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&input)?)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FeatureDefinition> {
        self.features.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.features.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Rules dropped while compiling a payload.
    #[must_use]
    pub fn skipped_rules(&self) -> usize {
        self.skipped_rules
    }

    fn rule_count(&self) -> usize {
        self.features.values().map(|f| f.rules.len()).sum()
    }
}

impl fmt::Display for FeatureDefinitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FeatureDefinitions({} features, {} rules, {} skipped)",
            self.features.len(),
            self.rule_count(),
            self.skipped_rules,
        )
    }
}
