//! Cached, deduplicated access to remote feature payloads.
//!
//! One [`FeatureRepository`] owns every snapshot it has fetched, keyed by
//! [`FeatureEndpoint::cache_key`]. Snapshots are immutable `Arc`s; a store
//! swaps the pointer under a short write lock, so readers never see a
//! half-built feature map.

mod decrypt;
mod error;
mod fetch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::DateTime;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub use decrypt::{decrypt, decrypt_features};
pub use error::{DecryptError, RepositoryError};
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{FeatureEndpoint, FeatureFetcher, DEFAULT_REQUEST_TIMEOUT};

use crate::compile::compile_features;
use crate::parse::FeatureApiResponse;
use crate::FeatureDefinitions;

type FetchResult = Result<Arc<FeatureDefinitions>, RepositoryError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Receives every snapshot stored for one endpoint.
pub type SnapshotReceiver = watch::Receiver<Option<Arc<FeatureDefinitions>>>;

/// Cache timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// How long a fetched snapshot is served without asking the network.
    pub stale_ttl: Duration,
    /// Period of the background auto-refresh poller.
    pub refresh_interval: Duration,
    /// Fetch timeout when the caller does not give one.
    pub default_timeout: Duration,
    /// Hard limit on one underlying fetch, including the part that runs on
    /// in the background after a caller timed out. A fetch past this limit
    /// is abandoned so the next refresh starts a new one.
    pub fetch_deadline: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_ttl: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(60),
            default_timeout: Duration::from_secs(10),
            fetch_deadline: Duration::from_secs(60),
        }
    }
}

/// Options for [`FeatureRepository::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Keep the snapshot current with a background poller.
    pub auto_refresh: bool,
    pub timeout: Option<Duration>,
    /// Fetch even when a fresh snapshot is cached.
    pub skip_cache: bool,
}

/// Options for [`FeatureRepository::refresh`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    pub timeout: Option<Duration>,
    pub skip_cache: bool,
}

impl From<LoadOptions> for RefreshOptions {
    fn from(options: LoadOptions) -> Self {
        Self {
            timeout: options.timeout,
            skip_cache: options.skip_cache,
        }
    }
}

/// A running background task. Cancelled on [`cancel`](Self::cancel) or drop;
/// results it has already stored stay in place.
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn cancel(self) {
        drop(self);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct CacheEntry {
    snapshot: Arc<FeatureDefinitions>,
    /// Plaintext `features` object the snapshot was compiled from.
    features: Arc<Map<String, Value>>,
    date_updated: Option<String>,
    /// `None` for entries restored from disk that were already stale.
    fetched_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Cache entry as seen by the persisted cache format.
#[cfg_attr(not(feature = "binary-cache"), allow(dead_code))]
pub(crate) struct EntryExport {
    pub(crate) key: String,
    pub(crate) features: Arc<Map<String, Value>>,
    pub(crate) date_updated: Option<String>,
    pub(crate) age: Option<Duration>,
}

struct RepositoryInner {
    fetcher: Arc<dyn FeatureFetcher>,
    settings: CacheSettings,
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, (u64, SharedFetch)>>,
    next_fetch: AtomicU64,
    channels: Mutex<HashMap<String, watch::Sender<Option<Arc<FeatureDefinitions>>>>>,
    pollers: Mutex<HashMap<String, RefreshHandle>>,
}

/// Owns fetched feature snapshots and their refresh lifecycle.
///
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct FeatureRepository {
    inner: Arc<RepositoryInner>,
}

impl std::fmt::Debug for FeatureRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRepository")
            .field("settings", &self.inner.settings)
            .field("entries", &self.inner.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl FeatureRepository {
    pub fn new(fetcher: impl FeatureFetcher + 'static) -> Self {
        Self::with_settings(fetcher, CacheSettings::default())
    }

    pub fn with_settings(fetcher: impl FeatureFetcher + 'static, settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                fetcher: Arc::new(fetcher),
                settings,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_fetch: AtomicU64::new(0),
                channels: Mutex::new(HashMap::new()),
                pollers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Repository backed by [`HttpFetcher`].
    #[cfg(feature = "http")]
    #[must_use]
    pub fn http() -> Self {
        Self::new(HttpFetcher::new())
    }

    #[must_use]
    pub fn settings(&self) -> CacheSettings {
        self.inner.settings
    }

    /// Return the freshest snapshot available for `endpoint`.
    ///
    /// A failed fetch falls back to the last stored snapshot, however old.
    /// With `auto_refresh`, a poller keeps refetching every
    /// `refresh_interval` until [`stop_auto_refresh`](Self::stop_auto_refresh).
    ///
    /// # Errors
    ///
    /// Returns the fetch error only when nothing is cached for `endpoint`.
    pub async fn load(&self, endpoint: &FeatureEndpoint, options: LoadOptions) -> FetchResult {
        if options.auto_refresh {
            self.start_auto_refresh(endpoint);
        }

        match self.refresh(endpoint, options.into()).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => match self.cached(endpoint) {
                Some(snapshot) => {
                    warn!(endpoint = %endpoint.cache_key(), error = %err, "feature fetch failed; serving cached snapshot");
                    Ok(snapshot)
                }
                None => Err(err),
            },
        }
    }

    /// Fetch `endpoint` unless a fresh snapshot is cached.
    ///
    /// Concurrent calls for the same endpoint share one request and all
    /// observe its result. When the timeout elapses the request keeps running
    /// in the background and still lands in the cache.
    ///
    /// # Errors
    ///
    /// Returns the fetch, decode or decryption failure, or
    /// [`RepositoryError::Timeout`].
    pub async fn refresh(&self, endpoint: &FeatureEndpoint, options: RefreshOptions) -> FetchResult {
        let key = endpoint.cache_key();
        if !options.skip_cache {
            if let Some(snapshot) = self.fresh(&key) {
                debug!(endpoint = %key, "serving fresh cached features");
                return Ok(snapshot);
            }
        }

        let limit = options.timeout.unwrap_or(self.inner.settings.default_timeout);
        let fetch = RepositoryInner::collapsed_fetch(&self.inner, endpoint);
        match tokio::time::timeout(limit, fetch.clone()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(endpoint = %key, ?limit, "feature fetch timed out; continuing in background");
                tokio::spawn(fetch.map(|_| ()));
                Err(RepositoryError::Timeout(limit))
            }
        }
    }

    /// Last stored snapshot for `endpoint`, fresh or not.
    #[must_use]
    pub fn cached(&self, endpoint: &FeatureEndpoint) -> Option<Arc<FeatureDefinitions>> {
        self.inner
            .entries
            .read()
            .get(&endpoint.cache_key())
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    fn fresh(&self, key: &str) -> Option<Arc<FeatureDefinitions>> {
        let ttl = self.inner.settings.stale_ttl;
        self.inner
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_fresh(ttl))
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    /// Watch every snapshot stored for `endpoint`. The current value is the
    /// cached snapshot, if any.
    #[must_use]
    pub fn subscribe(&self, endpoint: &FeatureEndpoint) -> SnapshotReceiver {
        let key = endpoint.cache_key();
        let mut channels = self.inner.channels.lock();
        channels
            .entry(key)
            .or_insert_with(|| watch::channel(self.cached(endpoint)).0)
            .subscribe()
    }

    /// Start polling `endpoint`; a no-op if a poller is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_auto_refresh(&self, endpoint: &FeatureEndpoint) {
        let key = endpoint.cache_key();
        let mut pollers = self.inner.pollers.lock();
        if pollers.get(&key).is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let period = self.inner.settings.refresh_interval;
        let weak = Arc::downgrade(&self.inner);
        let target = endpoint.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let repository = FeatureRepository { inner };
                let options = RefreshOptions {
                    skip_cache: true,
                    timeout: None,
                };
                if let Err(err) = repository.refresh(&target, options).await {
                    warn!(endpoint = %target.cache_key(), error = %err, "background feature refresh failed");
                }
            }
        });
        debug!(endpoint = %key, ?period, "auto-refresh started");
        pollers.insert(key, RefreshHandle::new(task));
    }

    /// Stop the poller for `endpoint`. Returns whether one was running.
    pub fn stop_auto_refresh(&self, endpoint: &FeatureEndpoint) -> bool {
        self.inner
            .pollers
            .lock()
            .remove(&endpoint.cache_key())
            .is_some()
    }

    /// Drop every cached snapshot. Subscribers keep their last value.
    pub fn clear_cache(&self) {
        self.inner.entries.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    #[cfg_attr(not(feature = "binary-cache"), allow(dead_code))]
    pub(crate) fn export_entries(&self) -> Vec<EntryExport> {
        let mut exported: Vec<EntryExport> = self
            .inner
            .entries
            .read()
            .iter()
            .map(|(key, entry)| EntryExport {
                key: key.clone(),
                features: Arc::clone(&entry.features),
                date_updated: entry.date_updated.clone(),
                age: entry.fetched_at.map(|at| at.elapsed()),
            })
            .collect();
        exported.sort_by(|a, b| a.key.cmp(&b.key));
        exported
    }

    /// Restore a persisted entry. Entries older than `stale_ttl` come back
    /// stale, so the next load refetches them.
    #[cfg_attr(not(feature = "binary-cache"), allow(dead_code))]
    pub(crate) fn import_entry(&self, entry: EntryExport) -> Arc<FeatureDefinitions> {
        let fetched_at = entry
            .age
            .filter(|age| *age < self.inner.settings.stale_ttl)
            .and_then(|age| Instant::now().checked_sub(age));
        let snapshot = Arc::new(compile_features((*entry.features).clone()));
        self.inner.store(
            &entry.key,
            CacheEntry {
                snapshot,
                features: entry.features,
                date_updated: entry.date_updated,
                fetched_at,
            },
        )
    }
}

impl RepositoryInner {
    /// Join the in-flight fetch for this endpoint or start one.
    fn collapsed_fetch(this: &Arc<Self>, endpoint: &FeatureEndpoint) -> SharedFetch {
        let key = endpoint.cache_key();
        let mut in_flight = this.in_flight.lock();
        if let Some((_, fetch)) = in_flight.get(&key) {
            debug!(endpoint = %key, "joining in-flight feature fetch");
            return fetch.clone();
        }

        let id = this.next_fetch.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Self> = Arc::downgrade(this);
        let target = endpoint.clone();
        let fetch = async move {
            let Some(inner) = weak.upgrade() else {
                return Err(RepositoryError::Fetch("repository dropped".into()));
            };
            let deadline = inner.settings.fetch_deadline;
            let result = tokio::time::timeout(deadline, inner.fetch_and_store(&target))
                .await
                .unwrap_or(Err(RepositoryError::Timeout(deadline)));
            if let Err(err) = &result {
                warn!(endpoint = %target.cache_key(), error = %err, "feature fetch failed");
            }
            inner.finish_fetch(&target.cache_key(), id);
            result
        }
        .boxed()
        .shared();

        in_flight.insert(key, (id, fetch.clone()));
        fetch
    }

    fn finish_fetch(&self, key: &str, id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|(current, _)| *current == id) {
            in_flight.remove(key);
        }
    }

    async fn fetch_and_store(&self, endpoint: &FeatureEndpoint) -> FetchResult {
        let response = self.fetcher.fetch(endpoint).await?;
        let (features, date_updated) = plaintext_features(response, endpoint)?;
        let snapshot = Arc::new(compile_features(features.clone()));
        debug!(endpoint = %endpoint.cache_key(), %snapshot, "fetched features");

        Ok(self.store(
            &endpoint.cache_key(),
            CacheEntry {
                snapshot,
                features: Arc::new(features),
                date_updated,
                fetched_at: Some(Instant::now()),
            },
        ))
    }

    /// Replace the entry unless the cached payload is newer, then publish.
    fn store(&self, key: &str, entry: CacheEntry) -> Arc<FeatureDefinitions> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get_mut(key) {
            if !is_newer(entry.date_updated.as_deref(), existing.date_updated.as_deref()) {
                debug!(
                    endpoint = %key,
                    incoming = ?entry.date_updated,
                    cached = ?existing.date_updated,
                    "payload is not newer than cache; keeping cached snapshot"
                );
                if entry.fetched_at.is_some() {
                    existing.fetched_at = entry.fetched_at;
                }
                return Arc::clone(&existing.snapshot);
            }
        }

        let snapshot = Arc::clone(&entry.snapshot);
        entries.insert(key.to_owned(), entry);
        drop(entries);

        if let Some(sender) = self.channels.lock().get(key) {
            sender.send_replace(Some(Arc::clone(&snapshot)));
        }
        snapshot
    }
}

/// Pull the plaintext `features` object out of a response, decrypting it
/// when needed.
fn plaintext_features(
    response: FeatureApiResponse,
    endpoint: &FeatureEndpoint,
) -> Result<(Map<String, Value>, Option<String>), RepositoryError> {
    let FeatureApiResponse {
        features,
        encrypted_features,
        date_updated,
    } = response;

    let features = match encrypted_features {
        Some(payload) => {
            let key = endpoint
                .decryption_key
                .as_deref()
                .ok_or(RepositoryError::MissingDecryptionKey)?;
            let json = decrypt(&payload, key)?;
            serde_json::from_str(&json)?
        }
        None => features.unwrap_or_default(),
    };
    Ok((features, date_updated))
}

/// Whether `incoming` should replace `cached`. Missing or unparsable
/// timestamps never block a store.
fn is_newer(incoming: Option<&str>, cached: Option<&str>) -> bool {
    let parse = |s: &str| DateTime::parse_from_rfc3339(s).ok();
    match (incoming.and_then(parse), cached.and_then(parse)) {
        (Some(incoming), Some(cached)) => incoming > cached,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_dates_win() {
        assert!(is_newer(
            Some("2024-05-02T00:00:00Z"),
            Some("2024-05-01T00:00:00Z")
        ));
        assert!(!is_newer(
            Some("2024-05-01T00:00:00Z"),
            Some("2024-05-02T00:00:00Z")
        ));
        assert!(!is_newer(
            Some("2024-05-01T00:00:00Z"),
            Some("2024-05-01T00:00:00Z")
        ));
    }

    #[test]
    fn missing_dates_never_block() {
        assert!(is_newer(None, Some("2024-05-01T00:00:00Z")));
        assert!(is_newer(Some("2024-05-01T00:00:00Z"), None));
        assert!(is_newer(Some("yesterday"), Some("2024-05-01T00:00:00Z")));
    }

    #[test]
    fn offsets_are_compared_as_instants() {
        assert!(!is_newer(
            Some("2024-05-01T02:00:00+02:00"),
            Some("2024-05-01T00:00:00Z")
        ));
    }

    #[test]
    fn plaintext_features_requires_key_for_encrypted() {
        let response = FeatureApiResponse {
            encrypted_features: Some("a.b".into()),
            ..FeatureApiResponse::default()
        };
        let endpoint = FeatureEndpoint::new("https://x", "k");
        assert_eq!(
            plaintext_features(response, &endpoint).unwrap_err(),
            RepositoryError::MissingDecryptionKey
        );
    }

    #[test]
    fn empty_response_is_empty_features() {
        let endpoint = FeatureEndpoint::new("https://x", "k");
        let (features, date) =
            plaintext_features(FeatureApiResponse::default(), &endpoint).unwrap();
        assert!(features.is_empty());
        assert_eq!(date, None);
    }
}
