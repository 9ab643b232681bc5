use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::kind::ResourceKind;
use crate::resource::{ActualResource, DesiredResource};
use crate::result::{AttributeDiff, ComparisonResult};
use crate::task::TaskGroup;
use crate::value::AttrMap;

/// Platform-side listing filters for one kind (e.g. `{"tag:Env": "prod"}`).
pub type PlatformFilters = BTreeMap<String, String>;

/// Source of desired resources (a state file, an HCL module directory).
#[async_trait]
pub trait StateProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// All desired resources of `kind` known to this source.
    async fn list(
        &self,
        cancel: &CancellationToken,
        kind: ResourceKind,
    ) -> Result<Vec<Arc<dyn DesiredResource>>>;

    /// The single desired resource at `identifier`. `RESOURCE_NOT_FOUND` when
    /// absent, or when the address exists but maps to a different kind.
    async fn get(
        &self,
        cancel: &CancellationToken,
        kind: ResourceKind,
        identifier: &str,
    ) -> Result<Arc<dyn DesiredResource>>;
}

/// Source of actual resources, streaming them as the platform pages through
/// its APIs. Implementations send every discovered resource on `out` and
/// return once the listing is exhausted; dropping `out` closes the stream.
#[async_trait]
pub trait PlatformProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list(
        &self,
        cancel: &CancellationToken,
        kinds: &[ResourceKind],
        filters: &BTreeMap<ResourceKind, PlatformFilters>,
        out: mpsc::Sender<Arc<dyn ActualResource>>,
    ) -> Result<()>;
}

/// A desired resource paired with its observed counterpart.
#[derive(Clone)]
pub struct MatchedPair {
    pub desired: Arc<dyn DesiredResource>,
    pub actual: Arc<dyn ActualResource>,
}

/// Partition produced by a [`Matcher`] over complete desired/actual sets.
#[derive(Default)]
pub struct MatchOutcome {
    pub matched: Vec<MatchedPair>,
    pub unmatched_desired: Vec<Arc<dyn DesiredResource>>,
    pub unmatched_actual: Vec<Arc<dyn ActualResource>>,
}

#[async_trait]
pub trait Matcher: Send + Sync {
    async fn pair(
        &self,
        cancel: &CancellationToken,
        desired: Vec<Arc<dyn DesiredResource>>,
        actual: Vec<Arc<dyn ActualResource>>,
    ) -> Result<MatchOutcome>;
}

/// Kind-specific structural comparator over normalized attribute maps.
#[async_trait]
pub trait Comparer: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Compare the configured `attributes` and return every semantic
    /// difference found. An empty vec means the pair is in sync. `group`
    /// carries the run's cancellation and bounds any fan-out the comparer
    /// performs internally.
    async fn compare(
        &self,
        group: &TaskGroup,
        desired: &AttrMap,
        actual: &AttrMap,
        attributes: &[String],
    ) -> Result<Vec<AttributeDiff>>;
}

/// Terminal sink for the aggregated run results.
pub trait Reporter: Send + Sync {
    fn report(&self, results: &[ComparisonResult]) -> Result<()>;
}
