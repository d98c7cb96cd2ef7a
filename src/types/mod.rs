mod attributes;
mod condition;
mod context;
mod error;
mod experiment;
mod feature;
mod result;
mod rule;
pub(crate) mod value;

pub(crate) use attributes::lookup;
pub use attributes::Attributes;
pub use condition::{
    field, CompareOp, Condition, ElemMatch, FieldCondition, Operator, Pattern, ValueTest,
};
pub use context::Context;
pub use error::ConfigError;
pub use experiment::{Experiment, DEFAULT_HASH_ATTRIBUTE};
pub use feature::{FeatureBuilder, FeatureDefinition, FeatureDefinitions, FeatureSetBuilder};
pub use result::{ExperimentResult, FeatureResult, FeatureSource};
pub use rule::{Exclusion, FeatureRule, Range, Rollout, RuleKind, Variant};
