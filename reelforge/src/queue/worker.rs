//! Stage job execution: the per-item lock, the three-step commit, and
//! failure classification live here.

use super::queues::QueuedJob;
use crate::adapters::{AdapterSet, StageContext, StageOutcome, StageOutput};
use crate::config::Settings;
use crate::dashboard::{DashboardClient, DashboardError, RowPatch, RowStatus};
use crate::registry;
use crate::resilience::CallError;
use crate::state::{classify_failure, Item, ItemFailure, ItemState, Stage, StateDb};
use crate::store::{ArtifactStore, ItemLockGuard, ItemLocks};
use crate::telemetry::{redact_text, PipelineMetrics};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Breaker cool-down used for `circuit_open` requeue delays; matches the
/// resilient layer's default.
const BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

/// Everything a worker needs, shared across all pools.
#[derive(Clone)]
pub struct WorkerDeps {
    pub db: Arc<StateDb>,
    pub dashboard: Arc<dyn DashboardClient>,
    pub locks: Arc<ItemLocks>,
    pub store: Arc<ArtifactStore>,
    pub adapters: Arc<AdapterSet>,
    pub settings: Arc<Settings>,
    pub metrics: Arc<PipelineMetrics>,
    pub in_flight: Arc<DashMap<(String, Stage), ()>>,
}

/// Runs one stage's worker pool until shutdown.
///
/// Workers share the stage receiver; each takes one job at a time and runs
/// it to completion, so pool size is the stage's parallelism bound.
pub async fn run_stage_pool(
    stage: Stage,
    receiver: tokio::sync::mpsc::Receiver<QueuedJob>,
    deps: WorkerDeps,
    shutdown: CancellationToken,
) {
    let workers = deps.settings.workers_for(stage);
    let receiver = Arc::new(Mutex::new(receiver));
    let mut handles = Vec::with_capacity(workers);

    for worker_index in 0..workers {
        let receiver = Arc::clone(&receiver);
        let deps = deps.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let job = {
                    let mut rx = receiver.lock().await;
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => None,
                        job = rx.recv() => job,
                    }
                };
                let Some(job) = job else { break };
                execute_job(&deps, &job, &shutdown).await;
                deps.in_flight.remove(&(job.item_id.clone(), job.stage));
            }
            debug!(stage = %stage, worker = worker_index, "worker stopped");
        }));
    }

    for handle in handles {
        // A panicking worker must not take its peers down; the pool keeps
        // draining and the panic surfaces in the logs.
        if let Err(e) = handle.await {
            error!(stage = %stage, error = %e, "worker task panicked");
        }
    }
}

/// Stage wall-clock budget: the class deadline times the attempt budget
/// covers the adapter's own internal retries.
fn stage_budget(stage: Stage) -> Duration {
    let spec = registry::spec(stage);
    spec.operation_class
        .overall_timeout()
        .saturating_mul(spec.max_attempts)
}

/// Executes one job end to end: lock, dispatch-commit, adapter run,
/// completion- or failure-commit.
pub async fn execute_job(deps: &WorkerDeps, job: &QueuedJob, shutdown: &CancellationToken) {
    let stage = job.stage;
    let guard = deps.locks.acquire(&job.item_id).await;

    let Some(mut item) = deps.db.get(&job.item_id) else {
        warn!(item_id = %job.item_id, "queued item vanished from the state store");
        return;
    };

    // The item may have moved on between discovery and now
    let spec = registry::spec(stage);
    if !spec.is_ready(&item, Utc::now()) {
        debug!(item_id = %item.item_id, stage = %stage, state = %item.state, "job no longer eligible, skipping");
        return;
    }

    // Dispatch commit: running state locally, `In Progress` on the row.
    // Approval polls an operator edit, so it neither consumes attempts nor
    // flips the row.
    let attempt = if stage == Stage::Approval {
        1
    } else {
        let previous_label = item.state.dashboard_label();
        let running = ItemState::running(stage);
        if item.state != running {
            if !item.state.can_transition(&running) {
                warn!(item_id = %item.item_id, from = %item.state, to = %running, "refusing illegal dispatch transition");
                return;
            }
            item.state = running;
        }
        let attempt = item.record_attempt(stage);
        item.touch();
        if let Err(e) = deps.db.commit(&guard, &item) {
            error!(item_id = %item.item_id, error = %e, "dispatch commit failed");
            return;
        }
        if previous_label != item.state.dashboard_label() {
            push_row(
                deps,
                &item.item_id,
                RowPatch::status(RowStatus::InProgress),
                RowStatus::parse(previous_label),
            )
            .await;
        }
        attempt
    };

    deps.metrics.job_dispatched(stage.as_str());
    let started = Instant::now();
    let cancel = shutdown.child_token();
    let ctx = StageContext {
        store: Arc::clone(&deps.store),
        settings: Arc::clone(&deps.settings),
        metrics: Arc::clone(&deps.metrics),
        cancel: cancel.clone(),
        attempt,
    };

    let Some(adapter) = deps.adapters.adapter(stage) else {
        error!(stage = %stage, "no adapter registered for stage");
        return;
    };

    let outcome = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            cancel.cancel();
            Err(CallError::Cancelled)
        }
        result = tokio::time::timeout(stage_budget(stage), adapter.execute(&ctx, &guard, &item)) => {
            match result {
                Ok(inner) => inner,
                Err(_) => {
                    cancel.cancel();
                    Err(CallError::Timeout { elapsed: started.elapsed() })
                }
            }
        }
    };
    let elapsed = started.elapsed();

    match outcome {
        Ok(StageOutcome::Completed(output)) => {
            commit_completion(deps, &guard, &mut item, stage, output).await;
            deps.metrics.job_succeeded(stage.as_str(), elapsed);
        }
        Ok(StageOutcome::NotReady) => {
            debug!(item_id = %item.item_id, stage = %stage, "stage not ready, no state change");
        }
        Err(CallError::Cancelled) => {
            info!(item_id = %item.item_id, stage = %stage, "job cancelled during shutdown");
        }
        Err(e) => {
            commit_failure(deps, &guard, &mut item, stage, e).await;
            deps.metrics.job_failed(stage.as_str(), elapsed);
        }
    }
}

/// Steps 2 and 3 of the commit: local state, then the dashboard. Artifacts
/// (step 1) were finalized inside the adapter.
async fn commit_completion(
    deps: &WorkerDeps,
    guard: &ItemLockGuard,
    item: &mut Item,
    stage: Stage,
    output: StageOutput,
) {
    for record in output.artifacts {
        item.put_artifact(record);
    }
    if let Some(timings) = output.timings {
        item.narration_timings = Some(timings);
    }
    if let Some(url) = output.publication_url {
        item.publication_url = Some(url);
    }

    let completed = ItemState::completed(stage);
    if !item.state.can_transition(&completed) {
        error!(item_id = %item.item_id, from = %item.state, to = %completed, "illegal completion transition");
        return;
    }
    item.state = completed;
    item.error = None;
    item.touch();

    if let Err(e) = deps.db.commit(guard, item) {
        // The artifact exists but local state does not know it yet; startup
        // reconciliation resolves exactly this window.
        error!(item_id = %item.item_id, error = %e, "completion commit failed");
        return;
    }

    let mut patch = output.patch;
    patch.status = RowStatus::parse(item.state.dashboard_label());
    push_row(deps, &item.item_id, patch, None).await;

    info!(item_id = %item.item_id, stage = %stage, state = %item.state, "stage completed");
}

/// Classifies a failure and commits the resulting state.
async fn commit_failure(
    deps: &WorkerDeps,
    guard: &ItemLockGuard,
    item: &mut Item,
    stage: Stage,
    error: CallError,
) {
    let kind = error.kind();
    let message = redact_text(&error.to_string());
    let attempts = item.attempts(stage);
    let max_attempts = registry::spec(stage).max_attempts;

    let next = classify_failure(kind, stage, attempts, max_attempts, BREAKER_COOLDOWN, Utc::now());
    let failed = matches!(next, ItemState::Failed { .. });
    if !item.state.can_transition(&next) {
        error!(item_id = %item.item_id, from = %item.state, to = %next, "illegal failure transition");
        return;
    }
    item.state = next;
    item.error = Some(ItemFailure {
        kind,
        message: message.clone(),
        stage: stage.as_str().to_string(),
        at: Utc::now(),
    });
    item.touch();

    if let Err(e) = deps.db.commit(guard, item) {
        error!(item_id = %item.item_id, error = %e, "failure commit failed");
        return;
    }

    if failed {
        let patch = RowPatch {
            status: Some(RowStatus::Failed),
            error: Some(format!("{}: {}", kind.as_str(), message)),
            ..Default::default()
        };
        push_row(deps, &item.item_id, patch, None).await;
        warn!(item_id = %item.item_id, stage = %stage, kind = kind.as_str(), attempts, "stage failed permanently");
    } else {
        info!(
            item_id = %item.item_id,
            stage = %stage,
            kind = kind.as_str(),
            attempts,
            "stage failed, requeued with backoff"
        );
    }
}

/// Pushes a row update, downgrading stale-row conflicts to an unconditional
/// retry: after approval, local state is authoritative for status.
async fn push_row(
    deps: &WorkerDeps,
    item_id: &str,
    patch: RowPatch,
    expected: Option<RowStatus>,
) {
    match deps.dashboard.update_fields(item_id, patch.clone(), expected).await {
        Ok(()) => {}
        Err(DashboardError::Stale { actual, .. }) => {
            debug!(item_id, actual = actual.as_str(), "row changed under us, overwriting");
            if let Err(e) = deps.dashboard.update_fields(item_id, patch, None).await {
                warn!(item_id, error = %e, "dashboard update failed after stale retry");
            }
        }
        Err(e) => {
            // Local state is committed; reconciliation repairs the row at
            // the next startup if the store stays unreachable.
            warn!(item_id, error = %e, "dashboard update failed");
        }
    }
}
