//! End-to-end pipeline behavior against in-memory providers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use driftscan_compare::{compute_instance_comparer, TagMatcher, DEFAULT_IGNORED_TAG_PREFIX};
use driftscan_domain::{
    ActualResource, AttrMap, AttrValue, Comparer, ComparisonResult, DesiredResource, DriftStatus,
    Error, ErrorCode, PlatformFilters, PlatformProvider, Reporter, ReportSummary, ResourceKind,
    ResourceMetadata, Result, StateProvider, StaticActual, StaticDesired,
};
use driftscan_engine::{Engine, KindRun, RunConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct VecStateProvider {
    resources: Vec<Arc<dyn DesiredResource>>,
}

#[async_trait]
impl StateProvider for VecStateProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn list(
        &self,
        _cancel: &CancellationToken,
        kind: ResourceKind,
    ) -> Result<Vec<Arc<dyn DesiredResource>>> {
        Ok(self
            .resources
            .iter()
            .filter(|r| r.metadata().kind == kind)
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        _cancel: &CancellationToken,
        _kind: ResourceKind,
        identifier: &str,
    ) -> Result<Arc<dyn DesiredResource>> {
        self.resources
            .iter()
            .find(|r| r.metadata().source_identifier == identifier)
            .cloned()
            .ok_or_else(|| Error::new(ErrorCode::ResourceNotFound, "not found"))
    }
}

struct VecPlatformProvider {
    resources: Vec<Arc<dyn ActualResource>>,
}

#[async_trait]
impl PlatformProvider for VecPlatformProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn list(
        &self,
        _cancel: &CancellationToken,
        _kinds: &[ResourceKind],
        _filters: &BTreeMap<ResourceKind, PlatformFilters>,
        out: mpsc::Sender<Arc<dyn ActualResource>>,
    ) -> Result<()> {
        for resource in &self.resources {
            out.send(resource.clone()).await.map_err(|_| Error::cancelled())?;
        }
        Ok(())
    }
}

struct FailingPlatformProvider;

#[async_trait]
impl PlatformProvider for FailingPlatformProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn list(
        &self,
        _cancel: &CancellationToken,
        _kinds: &[ResourceKind],
        _filters: &BTreeMap<ResourceKind, PlatformFilters>,
        _out: mpsc::Sender<Arc<dyn ActualResource>>,
    ) -> Result<()> {
        Err(Error::user(ErrorCode::Internal, "platform listing exploded"))
    }
}

/// Actual resource that lists fine but cannot be read in detail; its tag
/// map is still served so the matcher can pair it.
struct UnreadableActual {
    metadata: ResourceMetadata,
    tags: AttrMap,
    reads: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl ActualResource for UnreadableActual {
    fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }

    async fn attributes(&self, _cancel: &CancellationToken) -> Result<AttrMap> {
        // First read (matcher indexing) succeeds; later reads fail.
        if self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
            return Ok(self.tags.clone());
        }
        Err(Error::new(ErrorCode::Internal, "attribute fetch exploded"))
    }
}

#[derive(Default)]
struct CollectingReporter {
    results: Mutex<Vec<ComparisonResult>>,
    calls: Mutex<usize>,
}

impl Reporter for CollectingReporter {
    fn report(&self, results: &[ComparisonResult]) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        self.results.lock().unwrap().extend_from_slice(results);
        Ok(())
    }
}

fn tagged_attrs(entries: &[(&str, AttrValue)], address: &str) -> AttrMap {
    let mut attrs: AttrMap = entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    let mut tags = BTreeMap::new();
    tags.insert("Name".to_string(), AttrValue::from("test"));
    tags.insert("TFResourceAddress".to_string(), AttrValue::from(address));
    attrs.insert("tags".to_string(), AttrValue::Map(tags));
    attrs
}

fn desired(address: &str, entries: &[(&str, AttrValue)]) -> Arc<dyn DesiredResource> {
    Arc::new(StaticDesired::new(
        ResourceMetadata::new(ResourceKind::ComputeInstance, "aws", address),
        tagged_attrs(entries, address),
    ))
}

fn actual(id: &str, address: &str, entries: &[(&str, AttrValue)]) -> Arc<dyn ActualResource> {
    Arc::new(StaticActual::new(
        ResourceMetadata::new(ResourceKind::ComputeInstance, "aws", "")
            .with_provider_assigned_id(id),
        tagged_attrs(entries, address),
    ))
}

fn engine_for(
    desired: Vec<Arc<dyn DesiredResource>>,
    actual: Vec<Arc<dyn ActualResource>>,
    attributes: &[&str],
) -> (Engine, Arc<CollectingReporter>) {
    let reporter = Arc::new(CollectingReporter::default());
    let mut comparers: HashMap<ResourceKind, Arc<dyn Comparer>> = HashMap::new();
    comparers.insert(
        ResourceKind::ComputeInstance,
        Arc::new(compute_instance_comparer(DEFAULT_IGNORED_TAG_PREFIX)),
    );
    let engine = Engine::new(
        Arc::new(VecStateProvider { resources: desired }),
        Arc::new(VecPlatformProvider { resources: actual }),
        Arc::new(TagMatcher::new("TFResourceAddress").unwrap()),
        reporter.clone(),
        comparers,
        RunConfig {
            kinds: vec![KindRun {
                kind: ResourceKind::ComputeInstance,
                attributes: attributes.iter().map(|s| s.to_string()).collect(),
                platform_filters: PlatformFilters::new(),
            }],
            concurrency: 4,
        },
    );
    (engine, reporter)
}

#[tokio::test]
async fn all_in_sync() {
    let (engine, reporter) = engine_for(
        vec![desired("aws_instance.web", &[("instance_type", AttrValue::from("t2.micro"))])],
        vec![actual("i-1", "aws_instance.web", &[("instance_type", AttrValue::from("t2.micro"))])],
        &["instance_type", "tags"],
    );
    engine.run(&CancellationToken::new()).await.unwrap();

    let results = reporter.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DriftStatus::NoDrift);

    let summary = ReportSummary::tally(&results);
    assert_eq!(summary.total_resources_processed, 1);
    assert_eq!(summary.no_drift, 1);
}

#[tokio::test]
async fn scalar_drift_detected() {
    let (engine, reporter) = engine_for(
        vec![desired("aws_instance.web", &[("instance_type", AttrValue::from("t2.micro"))])],
        vec![actual("i-1", "aws_instance.web", &[("instance_type", AttrValue::from("t2.small"))])],
        &["instance_type", "tags"],
    );
    engine.run(&CancellationToken::new()).await.unwrap();

    let results = reporter.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DriftStatus::Drifted);
    assert_eq!(results[0].differences.len(), 1);
    let diff = &results[0].differences[0];
    assert_eq!(diff.attribute_name, "instance_type");
    assert_eq!(diff.expected_value, Some(AttrValue::from("t2.micro")));
    assert_eq!(diff.actual_value, Some(AttrValue::from("t2.small")));
}

#[tokio::test]
async fn missing_and_unmanaged() {
    let (engine, reporter) = engine_for(
        vec![desired("aws_instance.web", &[("instance_type", AttrValue::from("t2.micro"))])],
        vec![actual("i-app", "aws_instance.app", &[("instance_type", AttrValue::from("t2.micro"))])],
        &["instance_type"],
    );
    engine.run(&CancellationToken::new()).await.unwrap();

    let results = reporter.results.lock().unwrap();
    assert_eq!(results.len(), 2);

    let missing = results.iter().find(|r| r.status == DriftStatus::Missing).unwrap();
    assert_eq!(missing.source_identifier, "aws_instance.web");
    let unmanaged = results.iter().find(|r| r.status == DriftStatus::Unmanaged).unwrap();
    assert_eq!(unmanaged.provider_assigned_id, "i-app");

    // matched + missing = unique desired; matched + unmanaged <= actuals.
    let summary = ReportSummary::tally(&results);
    assert_eq!(summary.no_drift + summary.drifted + summary.missing, 1);
    assert!(summary.no_drift + summary.drifted + summary.unmanaged <= 2);
}

#[tokio::test]
async fn empty_attribute_list_short_circuits_to_no_drift() {
    let (engine, reporter) = engine_for(
        vec![desired("aws_instance.web", &[("instance_type", AttrValue::from("t2.micro"))])],
        vec![actual("i-1", "aws_instance.web", &[("instance_type", AttrValue::from("t2.huge"))])],
        &[],
    );
    engine.run(&CancellationToken::new()).await.unwrap();

    let results = reporter.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DriftStatus::NoDrift);
}

#[tokio::test]
async fn missing_comparer_becomes_error_result() {
    let reporter = Arc::new(CollectingReporter::default());
    let engine = Engine::new(
        Arc::new(VecStateProvider {
            resources: vec![desired("aws_instance.web", &[])],
        }),
        Arc::new(VecPlatformProvider {
            resources: vec![actual("i-1", "aws_instance.web", &[])],
        }),
        Arc::new(TagMatcher::new("TFResourceAddress").unwrap()),
        reporter.clone(),
        HashMap::new(),
        RunConfig {
            kinds: vec![KindRun {
                kind: ResourceKind::ComputeInstance,
                attributes: vec!["instance_type".to_string()],
                platform_filters: PlatformFilters::new(),
            }],
            concurrency: 2,
        },
    );
    engine.run(&CancellationToken::new()).await.unwrap();

    let results = reporter.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DriftStatus::Error);
    assert!(results[0].error_message.as_deref().unwrap().contains("no comparer"));
}

#[tokio::test]
async fn fatal_platform_error_aborts_and_returns_original_error() {
    let reporter = Arc::new(CollectingReporter::default());
    let mut comparers: HashMap<ResourceKind, Arc<dyn Comparer>> = HashMap::new();
    comparers.insert(
        ResourceKind::ComputeInstance,
        Arc::new(compute_instance_comparer(DEFAULT_IGNORED_TAG_PREFIX)),
    );
    let engine = Engine::new(
        Arc::new(VecStateProvider {
            resources: vec![desired("aws_instance.web", &[])],
        }),
        Arc::new(FailingPlatformProvider),
        Arc::new(TagMatcher::new("TFResourceAddress").unwrap()),
        reporter.clone(),
        comparers,
        RunConfig {
            kinds: vec![KindRun {
                kind: ResourceKind::ComputeInstance,
                attributes: vec!["instance_type".to_string()],
                platform_filters: PlatformFilters::new(),
            }],
            concurrency: 2,
        },
    );
    let err = engine.run(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    assert_eq!(err.message, "platform listing exploded");
}

#[tokio::test]
async fn failing_attribute_fetch_becomes_error_result() {
    let address = "aws_instance.web";
    let unreadable = Arc::new(UnreadableActual {
        metadata: ResourceMetadata::new(ResourceKind::ComputeInstance, "aws", "")
            .with_provider_assigned_id("i-broken"),
        tags: tagged_attrs(&[], address),
        reads: Default::default(),
    });
    let (engine, reporter) = {
        let reporter = Arc::new(CollectingReporter::default());
        let mut comparers: HashMap<ResourceKind, Arc<dyn Comparer>> = HashMap::new();
        comparers.insert(
            ResourceKind::ComputeInstance,
            Arc::new(compute_instance_comparer(DEFAULT_IGNORED_TAG_PREFIX)),
        );
        let engine = Engine::new(
            Arc::new(VecStateProvider { resources: vec![desired(address, &[])] }),
            Arc::new(VecPlatformProvider { resources: vec![unreadable] }),
            Arc::new(TagMatcher::new("TFResourceAddress").unwrap()),
            reporter.clone(),
            comparers,
            RunConfig {
                kinds: vec![KindRun {
                    kind: ResourceKind::ComputeInstance,
                    attributes: vec!["instance_type".to_string()],
                    platform_filters: PlatformFilters::new(),
                }],
                concurrency: 1,
            },
        );
        (engine, reporter)
    };
    engine.run(&CancellationToken::new()).await.unwrap();

    let results = reporter.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DriftStatus::Error);
    assert!(results[0].error_message.as_deref().unwrap().contains("attribute fetch exploded"));
}

#[tokio::test]
async fn pre_cancelled_token_returns_cancellation_without_reporting() {
    let (engine, reporter) = engine_for(
        vec![desired("aws_instance.web", &[])],
        vec![actual("i-1", "aws_instance.web", &[])],
        &["instance_type"],
    );
    let token = CancellationToken::new();
    token.cancel();
    let err = engine.run(&token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(*reporter.calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn identical_runs_produce_identical_sorted_reports() {
    let build = || {
        engine_for(
            vec![
                desired("aws_instance.b", &[("instance_type", AttrValue::from("t2.micro"))]),
                desired("aws_instance.a", &[("instance_type", AttrValue::from("t2.micro"))]),
            ],
            vec![
                actual("i-a", "aws_instance.a", &[("instance_type", AttrValue::from("t2.micro"))]),
                actual("i-b", "aws_instance.b", &[("instance_type", AttrValue::from("t3.large"))]),
            ],
            &["instance_type"],
        )
    };

    let mut sorted_runs = Vec::new();
    for _ in 0..2 {
        let (engine, reporter) = build();
        engine.run(&CancellationToken::new()).await.unwrap();
        let mut results = reporter.results.lock().unwrap().clone();
        driftscan_domain::result::sort_results(&mut results);
        sorted_runs.push(serde_json::to_string(&results).unwrap());
    }
    assert_eq!(sorted_runs[0], sorted_runs[1]);
}
