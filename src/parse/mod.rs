mod condition;
mod payload;
mod version;

pub use condition::parse_condition;
pub use payload::FeatureApiResponse;
pub use version::padded_version;

pub(crate) use payload::{RawExclusion, RawFeatureDefinition, RawFeatureRule};
