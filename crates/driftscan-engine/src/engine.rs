use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use driftscan_domain::{
    ActualResource, Comparer, ComparisonResult, DesiredResource, Error, ErrorCode, MatchOutcome,
    MatchedPair, Matcher, PlatformFilters, PlatformProvider, Reporter, ResourceKind, Result,
    StateProvider, TaskGroup,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Channel capacity between pipeline stages. Producers block when a
/// consumer lags, bounding memory on large fleets.
const STAGE_BUFFER: usize = 100;

/// One configured kind: which attributes to compare and which platform
/// filters apply when listing actuals.
#[derive(Debug, Clone)]
pub struct KindRun {
    pub kind: ResourceKind,
    pub attributes: Vec<String>,
    pub platform_filters: PlatformFilters,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub kinds: Vec<KindRun>,
    pub concurrency: usize,
}

/// The analysis engine. One [`Engine::run`] performs a full detection pass:
/// list desired and actual state, match, compare matched pairs on a bounded
/// worker pool, aggregate and report.
pub struct Engine {
    state: Arc<dyn StateProvider>,
    platform: Arc<dyn PlatformProvider>,
    matcher: Arc<dyn Matcher>,
    reporter: Arc<dyn Reporter>,
    comparers: HashMap<ResourceKind, Arc<dyn Comparer>>,
    config: RunConfig,
}

async fn send_guarded<T>(cancel: &CancellationToken, tx: &mpsc::Sender<T>, item: T) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::cancelled()),
        sent = tx.send(item) => sent.map_err(|_| Error::cancelled()),
    }
}

async fn recv_guarded<T>(cancel: &CancellationToken, rx: &mut mpsc::Receiver<T>) -> Result<Option<T>> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::cancelled()),
        item = rx.recv() => Ok(item),
    }
}

impl Engine {
    pub fn new(
        state: Arc<dyn StateProvider>,
        platform: Arc<dyn PlatformProvider>,
        matcher: Arc<dyn Matcher>,
        reporter: Arc<dyn Reporter>,
        comparers: HashMap<ResourceKind, Arc<dyn Comparer>>,
        config: RunConfig,
    ) -> Self {
        Self {
            state,
            platform,
            matcher,
            reporter,
            comparers,
            config,
        }
    }

    /// Run one end-to-end detection pass.
    ///
    /// The first stage to fail cancels its siblings. Unless the failure was
    /// a cancellation, whatever results were already aggregated are still
    /// reported before the error is returned.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let run_id = Uuid::new_v4();
        let concurrency = self.config.concurrency.max(1);
        info!(
            run_id = %run_id,
            kinds = self.config.kinds.len(),
            concurrency,
            "starting drift analysis"
        );

        let child = cancel.child_token();
        // The run's task group: comparer-internal fan-out (per-key sequence
        // diffing) spawns through this, so it shares the run's bound.
        let group = TaskGroup::new(child.clone(), concurrency);
        let results: Arc<Mutex<Vec<ComparisonResult>>> = Arc::new(Mutex::new(Vec::new()));

        let (desired_tx, desired_rx) = mpsc::channel::<Arc<dyn DesiredResource>>(STAGE_BUFFER);
        let (actual_tx, actual_rx) = mpsc::channel::<Arc<dyn ActualResource>>(STAGE_BUFFER);
        let (pairs_tx, pairs_rx) = mpsc::channel::<MatchedPair>(STAGE_BUFFER);
        let (out_tx, out_rx) = mpsc::channel::<ComparisonResult>(STAGE_BUFFER);

        let (desired_set_tx, desired_set_rx) = oneshot::channel();
        let (actual_set_tx, actual_set_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        // Desired listing: one stream over every configured kind.
        {
            let state = self.state.clone();
            let kinds: Vec<ResourceKind> = self.config.kinds.iter().map(|k| k.kind).collect();
            let token = child.clone();
            tasks.spawn(async move {
                for kind in kinds {
                    let listed = state.list(&token, kind).await?;
                    debug!(kind = %kind, count = listed.len(), "desired listing complete");
                    for resource in listed {
                        send_guarded(&token, &desired_tx, resource).await?;
                    }
                }
                Ok(())
            });
        }

        // Actual listing: the provider streams into an internal channel...
        let (platform_tx, platform_rx) = mpsc::channel::<Arc<dyn ActualResource>>(STAGE_BUFFER);
        {
            let platform = self.platform.clone();
            let kinds: Vec<ResourceKind> = self.config.kinds.iter().map(|k| k.kind).collect();
            let filters: BTreeMap<ResourceKind, PlatformFilters> = self
                .config
                .kinds
                .iter()
                .map(|k| (k.kind, k.platform_filters.clone()))
                .collect();
            let token = child.clone();
            tasks.spawn(async move {
                platform.list(&token, &kinds, &filters, platform_tx).await
            });
        }
        // ...and a forwarder moves it onto the pipeline channel.
        {
            let token = child.clone();
            let mut platform_rx = platform_rx;
            tasks.spawn(async move {
                while let Some(resource) = recv_guarded(&token, &mut platform_rx).await? {
                    send_guarded(&token, &actual_tx, resource).await?;
                }
                Ok(())
            });
        }

        // Collection: the matcher wants complete sets, not streams.
        {
            let token = child.clone();
            let mut desired_rx = desired_rx;
            tasks.spawn(async move {
                let mut collected = Vec::new();
                while let Some(resource) = recv_guarded(&token, &mut desired_rx).await? {
                    collected.push(resource);
                }
                let _ = desired_set_tx.send(collected);
                Ok(())
            });
        }
        {
            let token = child.clone();
            let mut actual_rx = actual_rx;
            tasks.spawn(async move {
                let mut collected = Vec::new();
                while let Some(resource) = recv_guarded(&token, &mut actual_rx).await? {
                    collected.push(resource);
                }
                let _ = actual_set_tx.send(collected);
                Ok(())
            });
        }

        // Matching: a strict barrier over both collected sets.
        {
            let matcher = self.matcher.clone();
            let token = child.clone();
            tasks.spawn(async move {
                let desired = tokio::select! {
                    _ = token.cancelled() => return Err(Error::cancelled()),
                    set = desired_set_rx => set.map_err(|_| Error::cancelled())?,
                };
                let actual = tokio::select! {
                    _ = token.cancelled() => return Err(Error::cancelled()),
                    set = actual_set_rx => set.map_err(|_| Error::cancelled())?,
                };
                let outcome = matcher
                    .pair(&token, desired, actual)
                    .await
                    .map_err(|e| match e.code {
                        ErrorCode::Cancelled => e,
                        _ => Error::wrap(ErrorCode::Matching, "matching failed", e),
                    })?;
                let _ = outcome_tx.send(outcome);
                Ok(())
            });
        }

        // Unmatched processing: record MISSING/UNMANAGED, dispatch pairs.
        {
            let token = child.clone();
            let results = results.clone();
            tasks.spawn(async move {
                let outcome: MatchOutcome = tokio::select! {
                    _ = token.cancelled() => return Err(Error::cancelled()),
                    outcome = outcome_rx => outcome.map_err(|_| Error::cancelled())?,
                };
                {
                    let mut aggregate = results.lock().expect("results lock poisoned");
                    for desired in &outcome.unmatched_desired {
                        aggregate.push(ComparisonResult::missing(desired.metadata()));
                    }
                    for actual in &outcome.unmatched_actual {
                        aggregate.push(ComparisonResult::unmanaged(actual.metadata()));
                    }
                }
                for pair in outcome.matched {
                    send_guarded(&token, &pairs_tx, pair).await?;
                }
                Ok(())
            });
        }

        // Comparison workers: exactly `concurrency` of them share the queue.
        let pairs_rx = Arc::new(tokio::sync::Mutex::new(pairs_rx));
        let attributes_by_kind: Arc<HashMap<ResourceKind, Vec<String>>> = Arc::new(
            self.config
                .kinds
                .iter()
                .map(|k| (k.kind, k.attributes.clone()))
                .collect(),
        );
        for worker in 0..concurrency {
            let token = child.clone();
            let group = group.clone();
            let pairs_rx = pairs_rx.clone();
            let out_tx = out_tx.clone();
            let comparers = self.comparers.clone();
            let attributes_by_kind = attributes_by_kind.clone();
            tasks.spawn(async move {
                loop {
                    let pair = {
                        let mut rx = pairs_rx.lock().await;
                        recv_guarded(&token, &mut rx).await?
                    };
                    let Some(pair) = pair else { break };
                    let result =
                        compare_pair(&group, &comparers, &attributes_by_kind, &pair).await?;
                    debug!(
                        worker,
                        identifier = %result.display_identifier(),
                        status = %result.status,
                        "compared pair"
                    );
                    send_guarded(&token, &out_tx, result).await?;
                }
                Ok(())
            });
        }
        drop(out_tx);

        // Aggregation: the single writer besides unmatched synthesis.
        {
            let token = child.clone();
            let results = results.clone();
            let mut out_rx = out_rx;
            tasks.spawn(async move {
                while let Some(result) = recv_guarded(&token, &mut out_rx).await? {
                    results.lock().expect("results lock poisoned").push(result);
                }
                Ok(())
            });
        }

        // First error wins and cancels the remaining stages. A cancellation
        // recorded first is upgraded by a later real error, so an unlucky
        // join order cannot mask the root cause.
        let mut first_error: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let stage_result = match joined {
                Ok(result) => result,
                Err(join_error) => Err(Error::wrap(
                    ErrorCode::Internal,
                    "pipeline stage panicked",
                    join_error,
                )),
            };
            if let Err(e) = stage_result {
                match &first_error {
                    None => {
                        if !e.is_cancelled() {
                            error!(error = %e.log_message(), "pipeline stage failed");
                        }
                        first_error = Some(e);
                        child.cancel();
                    }
                    Some(current) if current.is_cancelled() && !e.is_cancelled() => {
                        error!(error = %e.log_message(), "pipeline stage failed");
                        first_error = Some(e);
                    }
                    Some(_) => {}
                }
            }
        }

        let aggregated = {
            let mut guard = results.lock().expect("results lock poisoned");
            std::mem::take(&mut *guard)
        };

        match first_error {
            None => {
                info!(run_id = %run_id, results = aggregated.len(), "drift analysis complete");
                self.reporter.report(&aggregated)
            }
            Some(e) if e.is_cancelled() => Err(e),
            Some(e) => {
                if !aggregated.is_empty() {
                    warn!(
                        results = aggregated.len(),
                        "reporting partial results after pipeline failure"
                    );
                    if let Err(report_error) = self.reporter.report(&aggregated) {
                        warn!(error = %report_error, "partial report failed");
                    }
                }
                Err(e)
            }
        }
    }
}

/// Compare one matched pair. Per-pair problems become `ERROR` results;
/// only cancellation propagates as an error.
async fn compare_pair(
    group: &TaskGroup,
    comparers: &HashMap<ResourceKind, Arc<dyn Comparer>>,
    attributes_by_kind: &HashMap<ResourceKind, Vec<String>>,
    pair: &MatchedPair,
) -> Result<ComparisonResult> {
    let metadata = pair.desired.metadata();
    let kind = metadata.kind;

    let attributes = attributes_by_kind.get(&kind).map(Vec::as_slice).unwrap_or_default();
    if attributes.is_empty() {
        warn!(
            kind = %kind,
            identifier = %metadata.source_identifier,
            "no attributes configured for kind; reporting NO_DRIFT without comparing"
        );
        return Ok(ComparisonResult::no_drift(metadata));
    }

    let Some(comparer) = comparers.get(&kind) else {
        return Ok(ComparisonResult::error(
            metadata,
            &Error::new(
                ErrorCode::NotImplemented,
                format!("no comparer registered for kind '{kind}'"),
            ),
        ));
    };

    let actual_attributes = match pair.actual.attributes(group.cancellation()).await {
        Ok(attributes) => attributes,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => return Ok(ComparisonResult::error(metadata, &e)),
    };

    match comparer
        .compare(group, pair.desired.attributes(), &actual_attributes, attributes)
        .await
    {
        Ok(differences) if differences.is_empty() => Ok(ComparisonResult::no_drift(metadata)),
        Ok(differences) => Ok(ComparisonResult::drifted(metadata, differences)),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => Ok(ComparisonResult::error(
            metadata,
            &Error::wrap(ErrorCode::Comparison, "comparison failed", e),
        )),
    }
}
