//! Batched reporting of feature usage to a realtime endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::{FeatureResult, RepositoryError};

/// One feature whose value changed since it was last reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    pub key: String,
    pub on: bool,
}

/// Delivers a batch of usage events.
#[async_trait]
pub trait UsageTransport: Send + Sync {
    async fn send(&self, realtime_key: &str, events: &[UsageEvent]) -> Result<(), RepositoryError>;
}

/// Sends batches as `GET {host}/track?key=...&events=<json>`.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpUsageTransport {
    client: reqwest::Client,
    host: String,
    timeout: Duration,
}

#[cfg(feature = "http")]
impl HttpUsageTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
            timeout: crate::repository::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl UsageTransport for HttpUsageTransport {
    async fn send(&self, realtime_key: &str, events: &[UsageEvent]) -> Result<(), RepositoryError> {
        let url = format!("{}/track", self.host.trim_end_matches('/'));
        let events = serde_json::to_string(events)?;
        let response = self
            .client
            .get(&url)
            .query(&[("key", realtime_key), ("events", events.as_str())])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RepositoryError::Status(status.as_u16()));
        }
        Ok(())
    }
}

struct ReporterInner {
    key: String,
    interval: Duration,
    transport: Arc<dyn UsageTransport>,
    queue: Mutex<Vec<UsageEvent>>,
    last_seen: DashMap<String, Value>,
    flush_scheduled: AtomicBool,
}

impl ReporterInner {
    async fn flush(&self) -> Result<usize, RepositoryError> {
        let batch = std::mem::take(&mut *self.queue.lock());
        if batch.is_empty() {
            return Ok(0);
        }
        self.transport.send(&self.key, &batch).await?;
        debug!(events = batch.len(), "usage events sent");
        Ok(batch.len())
    }
}

/// Queues feature usage and sends it in batches, at most one batch per
/// interval.
///
/// A feature is queued only when its value differs from the last one
/// reported for it.
#[derive(Clone)]
pub struct RealtimeReporter {
    inner: Arc<ReporterInner>,
}

impl std::fmt::Debug for RealtimeReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeReporter")
            .field("interval", &self.inner.interval)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl RealtimeReporter {
    pub fn new(
        realtime_key: impl Into<String>,
        interval: Duration,
        transport: impl UsageTransport + 'static,
    ) -> Self {
        Self::with_transport(realtime_key, interval, Arc::new(transport))
    }

    pub fn with_transport(
        realtime_key: impl Into<String>,
        interval: Duration,
        transport: Arc<dyn UsageTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                key: realtime_key.into(),
                interval,
                transport,
                queue: Mutex::new(Vec::new()),
                last_seen: DashMap::new(),
                flush_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Note one evaluation of `feature`.
    pub fn record(&self, feature: &str, result: &FeatureResult) {
        match self.inner.last_seen.entry(feature.to_owned()) {
            Entry::Occupied(mut seen) => {
                if seen.get() == result.value() {
                    return;
                }
                seen.insert(result.value().clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(result.value().clone());
            }
        }

        self.inner.queue.lock().push(UsageEvent {
            key: feature.to_owned(),
            on: result.on(),
        });
        self.schedule();
    }

    /// Send whatever is queued now. Returns the number of events sent.
    ///
    /// # Errors
    ///
    /// Returns the transport failure; the failed batch is dropped.
    pub async fn flush(&self) -> Result<usize, RepositoryError> {
        self.inner.flush().await
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    fn schedule(&self) {
        if self.inner.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            self.inner.flush_scheduled.store(false, Ordering::Release);
            debug!("no tokio runtime; usage events stay queued until flush()");
            return;
        };

        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(inner.interval).await;
            inner.flush_scheduled.store(false, Ordering::Release);
            if let Err(err) = inner.flush().await {
                warn!(error = %err, "failed to send usage events");
            }
        });
    }
}
