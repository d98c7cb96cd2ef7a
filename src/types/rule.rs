use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::Condition;
use super::experiment::Experiment;
use crate::hash::HashVersion;

/// A half-open bucket interval `[start, end)` within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub start: f64,
    pub end: f64,
}

impl Range {
    #[must_use]
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn contains(&self, n: f64) -> bool {
        n >= self.start && n < self.end
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.start.is_finite()
            && self.end.is_finite()
            && 0.0 <= self.start
            && self.start <= self.end
            && self.end <= 1.0
    }
}

impl From<(f64, f64)> for Range {
    fn from((start, end): (f64, f64)) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One arm of an experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub value: Value,
    pub ranges: Vec<Range>,
    pub key: Option<String>,
    pub name: Option<String>,
}

impl Variant {
    #[must_use]
    pub fn new(value: impl Into<Value>, ranges: Vec<Range>) -> Self {
        Self {
            value: value.into(),
            ranges,
            key: None,
            name: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Keeps users who hash into `ranges` (under `seed`) out of an experiment.
/// Used for mutually exclusive experiments.
#[derive(Debug, Clone, PartialEq)]
pub struct Exclusion {
    pub seed: String,
    pub ranges: Vec<Range>,
    /// Defaults to the experiment's hash attribute.
    pub attribute: Option<String>,
    /// Defaults to the experiment's hash version.
    pub hash_version: Option<HashVersion>,
    pub should_track: bool,
}

impl Exclusion {
    #[must_use]
    pub fn new(seed: impl Into<String>, ranges: Vec<Range>) -> Self {
        Self {
            seed: seed.into(),
            ranges,
            attribute: None,
            hash_version: None,
            should_track: true,
        }
    }

    /// A legacy `[id, start, end]` namespace: users hashing outside
    /// `[start, end)` under seed `__{id}` are excluded.
    #[must_use]
    pub fn namespace(id: &str, start: f64, end: f64) -> Self {
        let ranges = [Range::new(0.0, start), Range::new(end, 1.0)]
            .into_iter()
            .filter(|r| r.width() > 0.0)
            .collect();
        Self {
            seed: format!("__{id}"),
            ranges,
            attribute: None,
            hash_version: Some(HashVersion::V1),
            should_track: true,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    #[must_use]
    pub fn with_hash_version(mut self, version: HashVersion) -> Self {
        self.hash_version = Some(version);
        self
    }

    #[must_use]
    pub fn untracked(mut self) -> Self {
        self.should_track = false;
        self
    }
}

/// Partial rollout gate for a force rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    pub seed: String,
    pub hash_attribute: String,
    pub hash_version: HashVersion,
    pub range: Range,
}

/// One ordered rule of a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRule {
    pub id: String,
    pub condition: Option<Condition>,
    pub kind: RuleKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Serve `value`, optionally only to the users inside `rollout`.
    Force {
        value: Value,
        rollout: Option<Rollout>,
    },
    /// Bucket the user into an experiment and serve the assigned variant.
    Experiment(Arc<Experiment>),
}

impl FeatureRule {
    #[must_use]
    pub fn force(value: impl Into<Value>) -> Self {
        Self {
            id: String::new(),
            condition: None,
            kind: RuleKind::Force {
                value: value.into(),
                rollout: None,
            },
        }
    }

    #[must_use]
    pub fn experiment(experiment: Experiment) -> Self {
        Self {
            id: String::new(),
            condition: None,
            kind: RuleKind::Experiment(Arc::new(experiment)),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Limit a force rule to users hashing below `coverage` under `seed`.
    /// Has no effect on experiment rules.
    #[must_use]
    pub fn rollout(mut self, seed: &str, hash_attribute: &str, coverage: f64) -> Self {
        if let RuleKind::Force { rollout, .. } = &mut self.kind {
            *rollout = Some(Rollout {
                seed: seed.to_owned(),
                hash_attribute: hash_attribute.to_owned(),
                hash_version: HashVersion::V1,
                range: Range::new(0.0, coverage.clamp(0.0, 1.0)),
            });
        }
        self
    }
}
