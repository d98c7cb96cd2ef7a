use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Body returned by the features endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureApiResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_features: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_updated: Option<String>,
}

// Wire shapes. Rules stay as raw `Value`s inside a definition so one bad
// rule can be dropped without rejecting the whole feature.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawFeatureDefinition {
    #[serde(default)]
    pub(crate) default_value: Value,
    #[serde(default)]
    pub(crate) rules: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawFeatureRule {
    pub(crate) id: Option<String>,
    pub(crate) condition: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub(crate) force: Option<Value>,
    pub(crate) key: Option<String>,
    pub(crate) seed: Option<String>,
    pub(crate) hash_attribute: Option<String>,
    pub(crate) hash_version: Option<u64>,
    pub(crate) variants: Option<Vec<RawVariant>>,
    pub(crate) variations: Option<Vec<Value>>,
    pub(crate) weights: Option<Vec<f64>>,
    pub(crate) ranges: Option<Vec<(f64, f64)>>,
    pub(crate) coverage: Option<f64>,
    pub(crate) range: Option<(f64, f64)>,
    pub(crate) namespace: Option<(String, f64, f64)>,
    pub(crate) exclusions: Option<Vec<RawExclusion>>,
    pub(crate) tracks: Option<bool>,
    pub(crate) name: Option<String>,
    pub(crate) phase: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawVariant {
    #[serde(default)]
    pub(crate) value: Value,
    #[serde(default)]
    pub(crate) ranges: Vec<(f64, f64)>,
    pub(crate) key: Option<String>,
    pub(crate) name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawExclusion {
    pub(crate) seed: String,
    #[serde(default)]
    pub(crate) ranges: Vec<(f64, f64)>,
    pub(crate) attribute: Option<String>,
    pub(crate) hash_version: Option<u64>,
    pub(crate) should_track: Option<bool>,
}

/// Keeps an explicit `null` distinct from an absent key.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}
