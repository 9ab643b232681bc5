//! Matching and structural comparison.
//!
//! The matcher pairs desired with actual resources through an identifying
//! tag. Comparers then walk the configured attributes of each pair with
//! kind-specific comparison functions, falling back to a robust generic
//! comparator, and report semantic rather than textual differences.

mod bucket;
mod comparer;
mod compute;
mod database;
mod helpers;
mod matcher;

pub use bucket::storage_bucket_comparer;
pub use comparer::KindComparer;
pub use compute::compute_instance_comparer;
pub use database::database_instance_comparer;
pub use matcher::TagMatcher;

/// Tag namespace ignored during tag comparison; AWS injects these.
pub const DEFAULT_IGNORED_TAG_PREFIX: &str = "aws:";
