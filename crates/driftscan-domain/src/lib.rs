pub mod error;
pub mod keys;
pub mod kind;
pub mod provider;
pub mod resource;
pub mod result;
pub mod task;
pub mod value;

pub use error::{Error, ErrorCode, Result};
pub use kind::ResourceKind;
pub use provider::{
    Comparer, MatchOutcome, MatchedPair, Matcher, PlatformFilters, PlatformProvider, Reporter,
    StateProvider,
};
pub use resource::{
    ActualResource, DesiredResource, ResourceMetadata, StaticActual, StaticDesired,
};
pub use result::{sort_results, AttributeDiff, ComparisonResult, DriftStatus, ReportSummary};
pub use task::TaskGroup;
pub use value::{AttrMap, AttrValue};
