use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatekeep::{
    Attributes, CacheSettings, Client, ClientBuilder, Context, Exclusion, Experiment,
    FeatureApiResponse, FeatureEndpoint, FeatureFetcher, FeatureRepository, FeatureSource,
    GatekeepError, LoadOptions, Range, RefreshOptions, RepositoryError, UsageEvent,
    UsageTransport,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

const KEY_128: &str = "AAECAwQFBgcICQoLDA0ODw==";
const ENCRYPTED_128: &str =
    "ZGVmZ2hpamtsbW5vcHFycw==.wG+5YcGXr6kTM/ZsdnbtTfppX7+r52g7sVA68uBXy6ow+mduHoh2cwad/iI0pdMg";
const KEY_256: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
const ENCRYPTED_256: &str = "EBESExQVFhcYGRobHB0eHw==.xp8HOGlm5pY6+N5Blbi996629p6o7cV9IIbDpsKPjeScsTt0W0Nbo8Pv9HR2b6y9e6J4wK2G6fF2z4DWooSrCe2NHnHk9JwW1XN46Qf9FubxyelDGuwxAT2FlbwsgRoZ";

const PAYLOAD: &str = r#"{
    "dark-mode": {
        "defaultValue": false,
        "rules": [{"condition": {"plan": "pro"}, "force": true}]
    },
    "exp1": {
        "defaultValue": "none",
        "rules": [{"id": "checkout-test", "variations": ["control", "treatment"]}]
    },
    "quiet": {
        "defaultValue": "none",
        "rules": [{"key": "quiet-exp", "variations": ["a", "b"], "tracks": false}]
    }
}"#;

fn client_for(id: &str) -> Client {
    let client = Client::new(Context::new().with_attribute("id", id));
    client.set_features_json(PAYLOAD).unwrap();
    client
}

type Exposures = Arc<Mutex<Vec<(String, usize, String)>>>;

fn record_exposures(client: &Client) -> Exposures {
    let seen: Exposures = Arc::default();
    let sink = Arc::clone(&seen);
    let _sub = client.on_exposure(move |experiment, result| {
        sink.lock().push((
            experiment.key.clone(),
            result.variation_id(),
            result.hash_value().to_owned(),
        ));
    });
    seen
}

// --- Evaluation and exposures ---

#[test]
fn feature_experiment_reports_exposure() {
    // exp1/v1: "1" -> 0.39 (control), "3" -> 0.58 (treatment).
    let client = client_for("1");
    let seen = record_exposures(&client);

    let result = client.evaluate_feature("exp1");
    assert_eq!(result.value(), "control");
    assert_eq!(result.source(), FeatureSource::Experiment);
    assert_eq!(result.rule_id(), "checkout-test");
    assert_eq!(
        result.experiment_result().and_then(|r| r.feature_id()),
        Some("exp1")
    );
    assert_eq!(*seen.lock(), vec![("exp1".to_owned(), 0, "1".to_owned())]);
}

#[test]
fn exposure_is_deduplicated_per_assignment() {
    let client = client_for("1");
    let seen = record_exposures(&client);

    for _ in 0..10 {
        client.evaluate_feature("exp1");
    }
    assert_eq!(seen.lock().len(), 1);

    client.set_attributes(Attributes::new().set("id", "3"));
    client.evaluate_feature("exp1");
    client.evaluate_feature("exp1");
    assert_eq!(
        *seen.lock(),
        vec![
            ("exp1".to_owned(), 0, "1".to_owned()),
            ("exp1".to_owned(), 1, "3".to_owned()),
        ]
    );
    assert_eq!(client.tracked_exposures(), 2);
}

#[test]
fn feature_and_direct_run_share_dedup() {
    let client = client_for("1");
    let seen = record_exposures(&client);

    client.evaluate_feature("exp1");
    let experiment = Experiment::from_legacy("exp1", ["control", "treatment"], None, 1.0).unwrap();
    assert!(client.run_experiment(&experiment).in_experiment());
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn untracked_experiments_are_silent() {
    let client = client_for("1");
    let seen = record_exposures(&client);

    assert!(client.evaluate_feature("quiet").experiment_result().is_some());
    let experiment = Experiment::from_legacy("exp2", ["a", "b"], None, 1.0)
        .unwrap()
        .with_exclusion(Exclusion::new("__ns1", vec![Range::new(0.0, 0.0)]).untracked());
    assert!(client.run_experiment(&experiment).in_experiment());

    assert!(seen.lock().is_empty());
    assert_eq!(client.tracked_exposures(), 0);
}

#[test]
fn override_is_not_an_exposure() {
    let client = client_for("1");
    let seen = record_exposures(&client);
    client.set_forced_variations(HashMap::from([("exp1".to_owned(), 1)]));

    let result = client.evaluate_feature("exp1");
    assert_eq!(result.value(), "treatment");
    assert_eq!(result.source(), FeatureSource::Override);
    assert!(seen.lock().is_empty());
}

#[test]
fn exposure_listener_can_be_cancelled() {
    let client = client_for("1");
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let sub = client.on_exposure(move |_, _| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    sub.cancel();

    client.evaluate_feature("exp1");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    // The assignment is still remembered.
    assert_eq!(client.tracked_exposures(), 1);
}

#[test]
fn context_replacement_applies_immediately() {
    let client = client_for("1");
    assert!(client.is_off("dark-mode"));

    client.set_context(Context::new().with_attribute("plan", "pro"));
    assert!(client.is_on("dark-mode"));

    client.set_context(Context::new().with_attribute("plan", "pro").with_enabled(false));
    assert!(client.is_off("dark-mode"));
}

#[test]
fn bad_json_keeps_snapshot() {
    let client = client_for("1");
    let err = client.set_features_json("[1, 2, 3]").unwrap_err();
    assert!(matches!(err, GatekeepError::Json(_)));
    assert_eq!(client.features().len(), 3);
}

// --- Encrypted payloads ---

#[test]
fn encrypted_payload_with_explicit_key() {
    let client = Client::new(Context::new());
    client
        .set_encrypted_features(ENCRYPTED_128, Some(KEY_128))
        .unwrap();
    assert!(client.is_on("feature"));
}

#[test]
fn encrypted_payload_with_context_key() {
    let client = Client::new(
        Context::new()
            .with_decryption_key(KEY_256)
            .with_attribute("country", "US"),
    );
    client.set_encrypted_features(ENCRYPTED_256, None).unwrap();
    assert_eq!(client.feature_value("banner", "none"), json!("red"));

    client.set_attributes(Attributes::new().set("country", "DE"));
    assert_eq!(client.feature_value("banner", "none"), json!("blue"));
}

#[test]
fn wrong_key_keeps_snapshot() {
    let client = client_for("1");
    let err = client
        .set_encrypted_features(ENCRYPTED_256, Some("c2hvcnQ="))
        .unwrap_err();
    assert!(matches!(err, GatekeepError::Repository(RepositoryError::Decrypt(_))));
    assert!(client.features().contains("exp1"));
}

// --- Remote loading ---

#[derive(Clone, Default)]
struct Versions {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl FeatureFetcher for Versions {
    async fn fetch(&self, endpoint: &FeatureEndpoint) -> Result<FeatureApiResponse, RepositoryError> {
        if endpoint.client_key == "sdk-broken" {
            return Err(RepositoryError::Status(500));
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let features: Map<String, Value> =
            serde_json::from_value(json!({"version": {"defaultValue": call}})).unwrap();
        Ok(FeatureApiResponse {
            features: Some(features),
            ..FeatureApiResponse::default()
        })
    }
}

fn remote_context(client_key: &str) -> Context {
    Context::new()
        .with_api_host("https://cdn.example.com")
        .with_client_key(client_key)
}

fn repository(fetcher: Versions) -> FeatureRepository {
    FeatureRepository::with_settings(
        fetcher,
        CacheSettings {
            refresh_interval: Duration::from_secs(30),
            ..CacheSettings::default()
        },
    )
}

#[tokio::test]
async fn load_features_installs_snapshot() {
    let fetcher = Versions::default();
    let client = ClientBuilder::new(remote_context("sdk-test"))
        .repository(repository(fetcher.clone()))
        .build();

    let snapshot = client.load_features(LoadOptions::default()).await.unwrap();
    assert!(snapshot.contains("version"));
    assert_eq!(client.feature_value("version", 0), json!(1));

    // Fresh cache: no second request.
    client.load_features(LoadOptions::default()).await.unwrap();
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    let options = RefreshOptions {
        skip_cache: true,
        timeout: None,
    };
    client.refresh_features(options).await.unwrap();
    assert_eq!(client.feature_value("version", 0), json!(2));
}

#[tokio::test]
async fn clients_share_a_repository() {
    let fetcher = Versions::default();
    let shared = repository(fetcher.clone());
    let a = ClientBuilder::new(remote_context("sdk-test"))
        .repository(shared.clone())
        .build();
    let b = ClientBuilder::new(remote_context("sdk-test"))
        .repository(shared)
        .build();

    a.load_features(LoadOptions::default()).await.unwrap();
    b.load_features(LoadOptions::default()).await.unwrap();
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(b.feature_value("version", 0), json!(1));
}

#[tokio::test]
async fn failed_refresh_keeps_installed_snapshot() {
    let client = ClientBuilder::new(remote_context("sdk-broken"))
        .repository(repository(Versions::default()))
        .features(gatekeep::FeatureDefinitions::from_json(PAYLOAD).unwrap())
        .build();

    let err = client
        .refresh_features(RefreshOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, RepositoryError::Status(500));
    assert!(client.features().contains("exp1"));
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_installs_new_snapshots() {
    let fetcher = Versions::default();
    let client = ClientBuilder::new(remote_context("sdk-test"))
        .repository(repository(fetcher.clone()))
        .build();
    let options = LoadOptions {
        auto_refresh: true,
        ..LoadOptions::default()
    };

    client.load_features(options).await.unwrap();
    assert_eq!(client.feature_value("version", 0), json!(1));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(client.feature_value("version", 0), json!(2));

    client.destroy();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.feature_value("version", 0), json!(2));
}

// --- Realtime usage ---

#[derive(Clone, Default)]
struct Capture {
    batches: Arc<Mutex<Vec<(String, Vec<UsageEvent>)>>>,
}

#[async_trait]
impl UsageTransport for Capture {
    async fn send(&self, realtime_key: &str, events: &[UsageEvent]) -> Result<(), RepositoryError> {
        self.batches
            .lock()
            .push((realtime_key.to_owned(), events.to_vec()));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn usage_is_batched_per_interval() {
    let capture = Capture::default();
    let context = Context::new()
        .with_attribute("id", "1")
        .with_realtime("rt-key", Duration::from_secs(2));
    let client = ClientBuilder::new(context)
        .usage_transport(capture.clone())
        .build();
    client.set_features_json(PAYLOAD).unwrap();

    client.evaluate_feature("dark-mode");
    client.evaluate_feature("exp1");
    client.evaluate_feature("dark-mode");
    assert!(capture.batches.lock().is_empty());

    tokio::time::sleep(Duration::from_secs(3)).await;
    {
        let batches = capture.batches.lock();
        assert_eq!(batches.len(), 1);
        let (key, events) = &batches[0];
        assert_eq!(key, "rt-key");
        assert_eq!(
            events,
            &vec![
                UsageEvent {
                    key: "dark-mode".into(),
                    on: false
                },
                UsageEvent {
                    key: "exp1".into(),
                    on: true
                },
            ]
        );
    }

    // Unchanged values are not reported again; a changed one is.
    client.evaluate_feature("exp1");
    client.set_attributes(Attributes::new().set("plan", "pro"));
    client.evaluate_feature("dark-mode");
    assert_eq!(client.flush_usage().await.unwrap(), 1);
    assert_eq!(capture.batches.lock().len(), 2);
}

#[tokio::test]
async fn flush_without_realtime_is_a_noop() {
    let client = client_for("1");
    client.evaluate_feature("exp1");
    assert_eq!(client.flush_usage().await.unwrap(), 0);
}
