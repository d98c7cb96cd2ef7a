//! Deterministic local evaluation of feature flags and experiments.
//!
//! Feature definitions are compiled once into an immutable
//! [`FeatureDefinitions`] snapshot. Evaluation against a [`Context`] is pure
//! and synchronous; the [`FeatureRepository`] fetches and caches snapshots,
//! and the [`Client`] ties a context to the current snapshot, deduplicates
//! exposures and calls listeners.

mod bucket;
mod client;
mod compile;
mod error;
mod evaluate;
mod hash;
mod parse;
mod realtime;
mod repository;
#[cfg(feature = "binary-cache")]
mod serial;
mod tracking;
mod types;

pub use bucket::{build_ranges, choose_variant, equal_weights, hash_value, in_range, is_excluded};
pub use client::{Client, ClientBuilder};
pub use error::GatekeepError;
pub use evaluate::{
    eval_condition, evaluate_feature, run_experiment, ExposureSink, NoopSink, RuleEngine,
};
pub use hash::{hash, HashVersion};
pub use parse::{padded_version, parse_condition, FeatureApiResponse};
#[cfg(feature = "http")]
pub use realtime::HttpUsageTransport;
pub use realtime::{RealtimeReporter, UsageEvent, UsageTransport};
#[cfg(feature = "http")]
pub use repository::HttpFetcher;
pub use repository::{
    decrypt, decrypt_features, CacheSettings, DecryptError, FeatureEndpoint, FeatureFetcher,
    FeatureRepository, LoadOptions, RefreshHandle, RefreshOptions, RepositoryError,
    SnapshotReceiver, DEFAULT_REQUEST_TIMEOUT,
};
#[cfg(feature = "binary-cache")]
pub use serial::{DeserializeError, SerializeError};
pub use tracking::{
    AssignmentKey, ExposureCallback, FeatureUsageCallback, Subscription, TrackingDeduplicator,
};
pub use types::{
    field, Attributes, CompareOp, Condition, ConfigError, Context, ElemMatch, Exclusion,
    Experiment, ExperimentResult, FeatureBuilder, FeatureDefinition, FeatureDefinitions,
    FeatureResult, FeatureRule, FeatureSetBuilder, FeatureSource, FieldCondition, Operator,
    Pattern, Range, Rollout, RuleKind, ValueTest, Variant, DEFAULT_HASH_ATTRIBUTE,
};
