use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::attributes::Attributes;

const DEFAULT_REALTIME_INTERVAL_MS: u64 = 2000;

/// Per-user evaluation settings plus the connection details a client needs.
///
/// Deserializes from the usual camelCase configuration object, so a host can
/// keep it in a JSON or TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Context {
    /// When false every feature resolves to its default and no experiment runs.
    pub enabled: bool,
    pub attributes: Attributes,
    /// Experiment key to variant index. Wins over hashing.
    pub forced_variations: HashMap<String, usize>,
    /// QA mode keeps everyone out of experiments.
    pub qa_mode: bool,
    /// Log evaluations at debug level instead of trace.
    pub dev_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decryption_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_host: Option<String>,
    #[serde(rename = "realtimeInterval")]
    pub realtime_interval_ms: u64,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            enabled: true,
            attributes: Attributes::default(),
            forced_variations: HashMap::new(),
            qa_mode: false,
            dev_mode: false,
            api_host: None,
            client_key: None,
            decryption_key: None,
            realtime_key: None,
            realtime_host: None,
            realtime_interval_ms: DEFAULT_REALTIME_INTERVAL_MS,
        }
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set one attribute at a dot-separated path.
    #[must_use]
    pub fn with_attribute(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(path, value.into());
        self
    }

    #[must_use]
    pub fn with_forced_variation(mut self, experiment: &str, variation: usize) -> Self {
        self.forced_variations.insert(experiment.to_owned(), variation);
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_qa_mode(mut self, qa_mode: bool) -> Self {
        self.qa_mode = qa_mode;
        self
    }

    #[must_use]
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    #[must_use]
    pub fn with_api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = Some(api_host.into());
        self
    }

    #[must_use]
    pub fn with_client_key(mut self, client_key: impl Into<String>) -> Self {
        self.client_key = Some(client_key.into());
        self
    }

    #[must_use]
    pub fn with_decryption_key(mut self, key: impl Into<String>) -> Self {
        self.decryption_key = Some(key.into());
        self
    }

    /// Enable usage reporting under `key`, flushed every `interval`.
    #[must_use]
    pub fn with_realtime(mut self, key: impl Into<String>, interval: Duration) -> Self {
        self.realtime_key = Some(key.into());
        self.realtime_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_realtime_host(mut self, host: impl Into<String>) -> Self {
        self.realtime_host = Some(host.into());
        self
    }

    #[must_use]
    pub fn realtime_interval(&self) -> Duration {
        Duration::from_millis(self.realtime_interval_ms)
    }

    /// Host usage events go to: the realtime host, else the API host.
    #[must_use]
    pub fn usage_host(&self) -> Option<&str> {
        self.realtime_host.as_deref().or(self.api_host.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults() {
        let ctx = Context::default();
        assert!(ctx.enabled);
        assert!(!ctx.qa_mode);
        assert_eq!(ctx.realtime_interval(), Duration::from_secs(2));
        assert!(ctx.attributes.is_empty());
    }

    #[test]
    fn builder_sets_fields() {
        let ctx = Context::new()
            .with_attribute("id", "u1")
            .with_attribute("company.plan", "pro")
            .with_forced_variation("exp", 1)
            .with_qa_mode(true);
        assert_eq!(ctx.attributes.get("company.plan"), Some(&json!("pro")));
        assert_eq!(ctx.forced_variations.get("exp"), Some(&1));
        assert!(ctx.qa_mode);
    }

    #[test]
    fn deserializes_camel_case_with_defaults() {
        let ctx: Context = serde_json::from_value(json!({
            "attributes": {"id": "abc"},
            "forcedVariations": {"exp": 2},
            "apiHost": "https://cdn.example.com",
            "clientKey": "sdk-123",
            "realtimeInterval": 500,
        }))
        .unwrap();
        assert!(ctx.enabled);
        assert_eq!(ctx.forced_variations.get("exp"), Some(&2));
        assert_eq!(ctx.client_key.as_deref(), Some("sdk-123"));
        assert_eq!(ctx.realtime_interval(), Duration::from_millis(500));
        assert_eq!(ctx.usage_host(), Some("https://cdn.example.com"));
    }

    #[test]
    fn realtime_host_wins() {
        let ctx = Context::new()
            .with_api_host("https://api")
            .with_realtime_host("https://rt");
        assert_eq!(ctx.usage_host(), Some("https://rt"));
    }
}
