//! Host-facing client: one context, the current snapshot, exposure
//! deduplication and listeners.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::evaluate::{ExposureSink, RuleEngine};
use crate::realtime::{RealtimeReporter, UsageTransport};
use crate::repository::{
    decrypt_features, FeatureEndpoint, FeatureRepository, LoadOptions, RefreshHandle,
    RefreshOptions, RepositoryError,
};
use crate::tracking::{
    AssignmentKey, ExposureCallback, FeatureUsageCallback, Listeners, Subscription,
    TrackingDeduplicator,
};
use crate::{
    Attributes, Context, Experiment, ExperimentResult, FeatureDefinitions, FeatureResult,
    GatekeepError,
};

/// Builds a [`Client`].
pub struct ClientBuilder {
    context: Context,
    features: FeatureDefinitions,
    repository: Option<FeatureRepository>,
    usage_transport: Option<Arc<dyn UsageTransport>>,
}

impl ClientBuilder {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            features: FeatureDefinitions::default(),
            repository: None,
            usage_transport: None,
        }
    }

    /// Initial snapshot, for hosts that ship features with the binary.
    #[must_use]
    pub fn features(mut self, features: FeatureDefinitions) -> Self {
        self.features = features;
        self
    }

    /// Share a repository between clients. Without one, a context with an
    /// api host and client key gets its own HTTP-backed repository.
    #[must_use]
    pub fn repository(mut self, repository: FeatureRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn usage_transport(mut self, transport: impl UsageTransport + 'static) -> Self {
        self.usage_transport = Some(Arc::new(transport));
        self
    }

    pub fn build(self) -> Client {
        let repository = self.repository.or_else(|| default_repository(&self.context));
        let realtime = self.context.realtime_key.as_deref().and_then(|key| {
            let transport = self
                .usage_transport
                .or_else(|| default_usage_transport(&self.context))?;
            Some(RealtimeReporter::with_transport(
                key,
                self.context.realtime_interval(),
                transport,
            ))
        });
        if self.context.realtime_key.is_some() && realtime.is_none() {
            warn!("realtime key set but no usage transport available; usage reporting disabled");
        }

        Client {
            inner: Arc::new(ClientInner {
                context: RwLock::new(Arc::new(self.context)),
                features: RwLock::new(Arc::new(self.features)),
                tracker: TrackingDeduplicator::new(),
                exposure: Arc::new(Listeners::default()),
                usage: Arc::new(Listeners::default()),
                repository,
                refresh: Mutex::new(None),
                realtime,
            }),
        }
    }
}

#[cfg(feature = "http")]
fn default_repository(context: &Context) -> Option<FeatureRepository> {
    FeatureEndpoint::from_context(context).map(|_| FeatureRepository::http())
}

#[cfg(not(feature = "http"))]
fn default_repository(_context: &Context) -> Option<FeatureRepository> {
    None
}

#[cfg(feature = "http")]
fn default_usage_transport(context: &Context) -> Option<Arc<dyn UsageTransport>> {
    let host = context.usage_host()?;
    Some(Arc::new(crate::realtime::HttpUsageTransport::new(host)))
}

#[cfg(not(feature = "http"))]
fn default_usage_transport(_context: &Context) -> Option<Arc<dyn UsageTransport>> {
    None
}

/// Background snapshot following started by an auto-refresh load.
struct Follow {
    task: RefreshHandle,
    endpoint: FeatureEndpoint,
}

struct ClientInner {
    context: RwLock<Arc<Context>>,
    features: RwLock<Arc<FeatureDefinitions>>,
    tracker: TrackingDeduplicator,
    exposure: Arc<Listeners<ExposureCallback>>,
    usage: Arc<Listeners<FeatureUsageCallback>>,
    repository: Option<FeatureRepository>,
    refresh: Mutex<Option<Follow>>,
    realtime: Option<RealtimeReporter>,
}

impl ClientInner {
    fn install(&self, snapshot: Arc<FeatureDefinitions>) {
        debug!(%snapshot, "installing feature snapshot");
        *self.features.write() = snapshot;
    }
}

impl ExposureSink for ClientInner {
    fn record(&self, experiment: &Experiment, result: &ExperimentResult) {
        if !self.tracker.first_exposure(AssignmentKey::new(experiment, result)) {
            debug!(experiment = %experiment.key, "exposure already reported");
            return;
        }
        for listener in self.exposure.snapshot() {
            listener(experiment, result);
        }
    }
}

/// Evaluates features for one context and reports exposures at most once per
/// assignment.
///
/// Cheap to clone; clones share state. Evaluation never blocks on the
/// network: it reads whatever snapshot is installed.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("features", &self.features().len())
            .field("tracked", &self.inner.tracker.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(context: Context) -> Self {
        ClientBuilder::new(context).build()
    }

    pub fn builder(context: Context) -> ClientBuilder {
        ClientBuilder::new(context)
    }

    pub fn evaluate_feature(&self, key: &str) -> FeatureResult {
        let context = self.context();
        let features = self.features();
        let result = RuleEngine::new(&features, &context, &*self.inner).evaluate_feature(key);

        if context.dev_mode {
            debug!(feature = key, source = %result.source(), value = %result.value(), rule = result.rule_id(), "evaluated feature");
        } else {
            trace!(feature = key, source = %result.source(), value = %result.value(), rule = result.rule_id(), "evaluated feature");
        }

        for listener in self.inner.usage.snapshot() {
            listener(key, &result);
        }
        if let Some(realtime) = &self.inner.realtime {
            realtime.record(key, &result);
        }
        result
    }

    pub fn is_on(&self, key: &str) -> bool {
        self.evaluate_feature(key).on()
    }

    pub fn is_off(&self, key: &str) -> bool {
        self.evaluate_feature(key).off()
    }

    /// The feature's value, or `fallback` when it resolves to null.
    pub fn feature_value(&self, key: &str, fallback: impl Into<Value>) -> Value {
        match self.evaluate_feature(key).into_value() {
            Value::Null => fallback.into(),
            value => value,
        }
    }

    /// Typed variant of [`feature_value`](Self::feature_value); `fallback` is
    /// also used when the value does not deserialize into `T`.
    pub fn feature_value_as<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        match self.evaluate_feature(key).into_value() {
            Value::Null => fallback,
            value => serde_json::from_value(value).unwrap_or(fallback),
        }
    }

    pub fn run_experiment(&self, experiment: &Experiment) -> ExperimentResult {
        let context = self.context();
        let features = self.features();
        let result = RuleEngine::new(&features, &context, &*self.inner).run_experiment(experiment);

        if context.dev_mode {
            debug!(experiment = %experiment.key, %result, "ran experiment");
        } else {
            trace!(experiment = %experiment.key, %result, "ran experiment");
        }
        result
    }

    /// Called once for each new tracked assignment.
    pub fn on_exposure(
        &self,
        listener: impl Fn(&Experiment, &ExperimentResult) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.exposure.add(Arc::new(listener))
    }

    /// Called after every feature evaluation.
    pub fn on_feature_usage(
        &self,
        listener: impl Fn(&str, &FeatureResult) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.usage.add(Arc::new(listener))
    }

    #[must_use]
    pub fn context(&self) -> Arc<Context> {
        Arc::clone(&self.inner.context.read())
    }

    #[must_use]
    pub fn features(&self) -> Arc<FeatureDefinitions> {
        Arc::clone(&self.inner.features.read())
    }

    pub fn set_features(&self, features: FeatureDefinitions) {
        self.inner.install(Arc::new(features));
    }

    /// Compile and install a plaintext `features` payload.
    ///
    /// # Errors
    ///
    /// Returns [`GatekeepError::Json`] if `json` is not a features object;
    /// the current snapshot stays installed.
    pub fn set_features_json(&self, json: &str) -> Result<(), GatekeepError> {
        self.set_features(FeatureDefinitions::from_json(json)?);
        Ok(())
    }

    /// Decrypt and install an `encryptedFeatures` payload. Without an explicit
    /// key the context's decryption key is used.
    ///
    /// # Errors
    ///
    /// Returns the decryption or decode failure; the current snapshot stays
    /// installed.
    pub fn set_encrypted_features(&self, payload: &str, key: Option<&str>) -> Result<(), GatekeepError> {
        let context = self.context();
        let key = key
            .or(context.decryption_key.as_deref())
            .ok_or(RepositoryError::MissingDecryptionKey)?;
        match decrypt_features(payload, key) {
            Ok(features) => {
                self.set_features(features);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "could not decrypt features; keeping current snapshot");
                Err(err.into())
            }
        }
    }

    pub fn set_attributes(&self, attributes: Attributes) {
        self.update_context(|context| context.attributes = attributes);
    }

    pub fn set_forced_variations(&self, forced: HashMap<String, usize>) {
        self.update_context(|context| context.forced_variations = forced);
    }

    /// Replace the whole context. Connection settings read at build time
    /// (repository, realtime reporting) are not rebuilt.
    pub fn set_context(&self, context: Context) {
        *self.inner.context.write() = Arc::new(context);
    }

    fn update_context(&self, update: impl FnOnce(&mut Context)) {
        let mut guard = self.inner.context.write();
        let mut next = Context::clone(&guard);
        update(&mut next);
        *guard = Arc::new(next);
    }

    /// Load features for the context's endpoint and install them.
    ///
    /// With `auto_refresh` every snapshot the repository stores afterwards is
    /// installed too, until [`destroy`](Self::destroy).
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotConfigured`] without a repository or endpoint,
    /// otherwise the failure of a load that had no cached fallback.
    pub async fn load_features(&self, options: LoadOptions) -> Result<Arc<FeatureDefinitions>, RepositoryError> {
        let (repository, endpoint) = self.remote()?;
        if options.auto_refresh {
            self.follow(&repository, &endpoint);
        }
        let snapshot = repository.load(&endpoint, options).await?;
        self.inner.install(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Re-fetch the context's endpoint and install the result.
    ///
    /// # Errors
    ///
    /// As [`FeatureRepository::refresh`]; the current snapshot stays
    /// installed on failure.
    pub async fn refresh_features(&self, options: RefreshOptions) -> Result<Arc<FeatureDefinitions>, RepositoryError> {
        let (repository, endpoint) = self.remote()?;
        let snapshot = repository.refresh(&endpoint, options).await?;
        self.inner.install(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn remote(&self) -> Result<(FeatureRepository, FeatureEndpoint), RepositoryError> {
        let repository = self
            .inner
            .repository
            .clone()
            .ok_or(RepositoryError::NotConfigured)?;
        let endpoint =
            FeatureEndpoint::from_context(&self.context()).ok_or(RepositoryError::NotConfigured)?;
        Ok((repository, endpoint))
    }

    fn follow(&self, repository: &FeatureRepository, endpoint: &FeatureEndpoint) {
        let mut slot = self.inner.refresh.lock();
        if slot
            .as_ref()
            .is_some_and(|follow| !follow.task.is_finished() && follow.endpoint == *endpoint)
        {
            return;
        }

        let mut updates = repository.subscribe(endpoint);
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let snapshot = updates.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    inner.install(snapshot);
                }
            }
        });
        *slot = Some(Follow {
            task: RefreshHandle::new(task),
            endpoint: endpoint.clone(),
        });
    }

    /// Send queued realtime usage now. Returns the number of events sent.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    pub async fn flush_usage(&self) -> Result<usize, RepositoryError> {
        match &self.inner.realtime {
            Some(realtime) => realtime.flush().await,
            None => Ok(0),
        }
    }

    /// Number of distinct assignments reported so far.
    #[must_use]
    pub fn tracked_exposures(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Forget reported assignments so they are reported again.
    pub fn reset(&self) {
        self.inner.tracker.clear();
    }

    /// Stop background refresh, drop listeners and forget reported
    /// assignments. The installed snapshot keeps serving evaluations.
    pub fn destroy(&self) {
        if let Some(follow) = self.inner.refresh.lock().take() {
            if let Some(repository) = &self.inner.repository {
                repository.stop_auto_refresh(&follow.endpoint);
            }
            follow.task.cancel();
        }
        self.inner.exposure.clear();
        self.inner.usage.clear();
        self.inner.tracker.clear();
    }
}
