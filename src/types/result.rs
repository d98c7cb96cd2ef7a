use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::experiment::Experiment;
use super::value::is_truthy;

/// Why a feature resolved to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureSource {
    UnknownFeature,
    DefaultValue,
    Force,
    Experiment,
    Override,
}

impl fmt::Display for FeatureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureSource::UnknownFeature => "unknownFeature",
            FeatureSource::DefaultValue => "defaultValue",
            FeatureSource::Force => "force",
            FeatureSource::Experiment => "experiment",
            FeatureSource::Override => "override",
        };
        f.write_str(name)
    }
}

/// Outcome of evaluating one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[must_use]
pub struct FeatureResult {
    value: Value,
    on: bool,
    off: bool,
    source: FeatureSource,
    rule_id: String,
    #[serde(skip)]
    experiment: Option<Arc<Experiment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    experiment_result: Option<ExperimentResult>,
}

impl fmt::Display for FeatureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.source)
    }
}

impl FeatureResult {
    pub fn new(value: Value, source: FeatureSource) -> Self {
        let on = is_truthy(Some(&value));
        Self {
            value,
            on,
            off: !on,
            source,
            rule_id: String::new(),
            experiment: None,
            experiment_result: None,
        }
    }

    pub(crate) fn with_rule_id(mut self, rule_id: &str) -> Self {
        rule_id.clone_into(&mut self.rule_id);
        self
    }

    pub(crate) fn with_experiment(
        mut self,
        experiment: Arc<Experiment>,
        result: ExperimentResult,
    ) -> Self {
        self.experiment = Some(experiment);
        self.experiment_result = Some(result);
        self
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Truthiness of the value.
    #[must_use]
    pub fn on(&self) -> bool {
        self.on
    }

    #[must_use]
    pub fn off(&self) -> bool {
        self.off
    }

    #[must_use]
    pub fn source(&self) -> FeatureSource {
        self.source
    }

    /// Id of the rule that produced the value; empty when no rule did.
    #[must_use]
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    #[must_use]
    pub fn experiment(&self) -> Option<&Arc<Experiment>> {
        self.experiment.as_ref()
    }

    #[must_use]
    pub fn experiment_result(&self) -> Option<&ExperimentResult> {
        self.experiment_result.as_ref()
    }
}

/// Outcome of running one experiment for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[must_use]
pub struct ExperimentResult {
    pub(crate) value: Value,
    #[serde(rename = "variationId")]
    pub(crate) variation: usize,
    pub(crate) key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    pub(crate) in_experiment: bool,
    pub(crate) hash_used: bool,
    pub(crate) hash_attribute: String,
    pub(crate) hash_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) feature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) bucket: Option<f64>,
}

impl fmt::Display for ExperimentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.in_experiment {
            write!(f, "variation {} = {}", self.key, self.value)
        } else {
            write!(f, "not in experiment")
        }
    }
}

impl ExperimentResult {
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Index of the assigned variant; 0 when not in the experiment.
    #[must_use]
    pub fn variation_id(&self) -> usize {
        self.variation
    }

    /// The variant's key, or its index as a string.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn in_experiment(&self) -> bool {
        self.in_experiment
    }

    /// Whether the assignment came from hashing rather than an override.
    #[must_use]
    pub fn hash_used(&self) -> bool {
        self.hash_used
    }

    #[must_use]
    pub fn hash_attribute(&self) -> &str {
        &self.hash_attribute
    }

    #[must_use]
    pub fn hash_value(&self) -> &str {
        &self.hash_value
    }

    #[must_use]
    pub fn feature_id(&self) -> Option<&str> {
        self.feature_id.as_deref()
    }

    /// The hash bucket in `[0, 1)`, when one was computed.
    #[must_use]
    pub fn bucket(&self) -> Option<f64> {
        self.bucket
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn on_off_follow_truthiness() {
        let r = FeatureResult::new(json!(1), FeatureSource::Force);
        assert!(r.on() && !r.off());
        let r = FeatureResult::new(json!(""), FeatureSource::DefaultValue);
        assert!(!r.on() && r.off());
        let r = FeatureResult::new(Value::Null, FeatureSource::UnknownFeature);
        assert!(r.off());
    }

    #[test]
    fn source_names() {
        assert_eq!(FeatureSource::UnknownFeature.to_string(), "unknownFeature");
        assert_eq!(
            serde_json::to_value(FeatureSource::DefaultValue).unwrap(),
            json!("defaultValue")
        );
    }

    #[test]
    fn feature_result_serializes() {
        let r = FeatureResult::new(json!("blue"), FeatureSource::Force).with_rule_id("r1");
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"value": "blue", "on": true, "off": false, "source": "force", "ruleId": "r1"})
        );
        assert_eq!(r.to_string(), "\"blue\" (force)");
    }
}
