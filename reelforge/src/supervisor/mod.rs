//! The supervisor: tick loop, discovery, dispatch, drain, and health.
//!
//! Owns the shutdown token, the stage queues, and the worker pools. Two run
//! modes: `run_once` performs a single production pass and drains;
//! `run_loop` runs continuous discovery with a daily full pass (ideation,
//! trend ingest, GC) at the configured local time.

mod health;

pub use health::HealthReport;

use crate::adapters::AdapterSet;
use crate::config::{DataLayout, Settings};
use crate::dashboard::{DashboardClient, HttpDashboard, ListFilter, RowStatus};
use crate::providers::{
    FfmpegMuxer, FileDownloader, HttpCaptionAligner, HttpClipSearch, HttpSpeechSynthesizer,
    HttpTextGenerator, HttpTrendSource, HttpVideoPublisher,
};
use crate::queue::{run_stage_pool, EnqueueResult, StageQueues, WorkerDeps};
use crate::registry;
use crate::resilience::{ResilientCaller, ResilientCallerConfig};
use crate::state::{reconcile, Item, ItemSource, ItemState, Stage, StateDb};
use crate::store::{collect_garbage, ArtifactStore, GcCandidate, GcReport, ItemLocks};
use crate::telemetry::PipelineMetrics;
use chrono::{Datelike, Local, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Horizon in seconds within which a scheduled retry counts as pending
/// work for the drain decision in `run_once`.
const RETRY_DRAIN_HORIZON_SECS: i64 = 60;

/// Stages dispatched through the worker pools.
const DISPATCHED_STAGES: [Stage; 8] = [
    Stage::Approval,
    Stage::Scripting,
    Stage::Narrating,
    Stage::SourcingClips,
    Stage::Assembling,
    Stage::Captioning,
    Stage::Metadata,
    Stage::Publishing,
];

/// Supervisor startup failures.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("state store failure: {0}")]
    State(#[from] crate::state::StateError),

    #[error("artifact store failure: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("breaker persistence failure: {0}")]
    Breakers(#[from] std::io::Error),
}

/// Outcome of one discovery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub scanned: usize,
    /// Production-stage jobs enqueued.
    pub enqueued: usize,
    /// Approval polls enqueued; tracked separately because they recur for
    /// as long as the operator has not decided.
    pub approval_polls: usize,
    pub deferred: usize,
    pub adopted: usize,
}

/// The pipeline supervisor.
pub struct Supervisor {
    deps: WorkerDeps,
    queues: StageQueues,
    caller: Option<Arc<ResilientCaller>>,
    layout: DataLayout,
    pools: Vec<JoinHandle<()>>,
    workers_shutdown: CancellationToken,
}

impl Supervisor {
    /// Production wiring: HTTP providers, ffmpeg muxer, startup
    /// reconciliation, restored breakers, and running worker pools.
    pub async fn bootstrap(settings: Settings) -> Result<Self, SupervisorError> {
        let layout = DataLayout::new(&settings.root);
        layout.prepare()?;

        let caller = Arc::new(ResilientCaller::new(ResilientCallerConfig::default()));
        caller.load_breakers(&layout.breakers_file())?;

        let dashboard: Arc<dyn DashboardClient> = Arc::new(HttpDashboard::new(
            &settings.dashboard_url,
            &settings.dashboard_token,
            Arc::clone(&caller),
        ));
        let textgen = Arc::new(HttpTextGenerator::new(
            &settings.textgen_url,
            &settings.textgen_api_key,
            Arc::clone(&caller),
        ));
        let trend_ingest = settings.trend.as_ref().map(|trend| {
            crate::adapters::TrendIngestAdapter::new(
                Arc::new(HttpTrendSource::new(
                    &settings.trend_url,
                    &trend.client_id,
                    &trend.client_secret,
                    &trend.category,
                    Arc::clone(&caller),
                )),
                Arc::clone(&dashboard),
                trend.clone(),
            )
        });
        let adapters = AdapterSet::new(
            Arc::clone(&dashboard),
            textgen,
            Arc::new(HttpSpeechSynthesizer::new(
                &settings.tts_url,
                &settings.tts_api_key,
                &settings.tts_voice,
                Arc::clone(&caller),
            )),
            Arc::new(HttpClipSearch::new(
                &settings.stock_url,
                &settings.stock_api_key,
                Arc::clone(&caller),
            )),
            Arc::new(FileDownloader::new(Arc::clone(&caller))),
            Arc::new(FfmpegMuxer::default()),
            Arc::new(HttpCaptionAligner::new(
                &settings.align_url,
                &settings.textgen_api_key,
                Arc::clone(&caller),
            )),
            Arc::new(HttpVideoPublisher::new(
                &settings.upload_url,
                &settings.upload_token,
                Arc::clone(&caller),
            )),
            trend_ingest,
        );

        let db = Arc::new(StateDb::open(layout.state_file())?);
        let store = Arc::new(ArtifactStore::open(layout.artifacts_dir())?);
        let locks = Arc::new(ItemLocks::new());

        // Best effort: a brand-new table gets its header row
        if let Err(e) = dashboard.ensure_headers().await {
            warn!(error = %e, "could not ensure dashboard headers");
        }
        reconcile(&db, dashboard.as_ref(), &locks).await?;

        Self::assemble(
            settings,
            layout,
            db,
            dashboard,
            store,
            locks,
            Arc::new(adapters),
            Some(caller),
        )
    }

    /// Wiring from pre-built components; tests inject stubs here.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        settings: Settings,
        layout: DataLayout,
        db: Arc<StateDb>,
        dashboard: Arc<dyn DashboardClient>,
        store: Arc<ArtifactStore>,
        locks: Arc<ItemLocks>,
        adapters: Arc<AdapterSet>,
        caller: Option<Arc<ResilientCaller>>,
    ) -> Result<Self, SupervisorError> {
        let (queues, receivers) = StageQueues::build(settings.queue_capacity, &DISPATCHED_STAGES);
        let deps = WorkerDeps {
            db,
            dashboard,
            locks,
            store,
            adapters,
            settings: Arc::new(settings),
            metrics: Arc::new(PipelineMetrics::new()),
            in_flight: queues.in_flight_handle(),
        };

        let workers_shutdown = CancellationToken::new();
        let pools = receivers
            .into_iter()
            .map(|stage_rx| {
                tokio::spawn(run_stage_pool(
                    stage_rx.stage,
                    stage_rx.receiver,
                    deps.clone(),
                    workers_shutdown.clone(),
                ))
            })
            .collect();

        Ok(Self {
            deps,
            queues,
            caller,
            layout,
            pools,
            workers_shutdown,
        })
    }

    /// Adopts dashboard rows the local store has never seen (operator
    /// seeding rows directly is normal workflow).
    async fn adopt_new_rows(&self) -> usize {
        let mut adopted = 0;
        for status in [RowStatus::PendingApproval, RowStatus::Approved] {
            let rows = match self.deps.dashboard.list_items(ListFilter::status(status)).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "dashboard listing failed during discovery");
                    return adopted;
                }
            };
            for row in rows {
                if self.deps.db.get(&row.id).is_some() {
                    continue;
                }
                let guard = self.deps.locks.acquire(&row.id).await;
                let source = ItemSource::parse(&row.source).unwrap_or(ItemSource::AiIdeation);
                let mut item = Item::new(row.id.clone(), source, row.title.clone());
                if row.status == RowStatus::Approved {
                    item.state = ItemState::Approved;
                }
                match self.deps.db.commit(&guard, &item) {
                    Ok(()) => adopted += 1,
                    Err(e) => warn!(item_id = %row.id, error = %e, "failed to adopt row"),
                }
            }
        }
        adopted
    }

    /// One discovery pass: adopt new rows, then enqueue every item whose
    /// next stage is eligible.
    pub async fn discover_once(&self) -> DiscoveryStats {
        self.discover(true).await
    }

    async fn discover(&self, include_approval: bool) -> DiscoveryStats {
        let mut stats = DiscoveryStats {
            adopted: self.adopt_new_rows().await,
            ..Default::default()
        };
        let now = Utc::now();
        let mut candidates = self.deps.db.list();
        // FIFO fairness: oldest update first
        candidates.sort_by_key(|item| item.updated_at);

        for item in candidates {
            stats.scanned += 1;
            let Some(stage) = registry::next_stage(&item, now) else {
                continue;
            };
            if stage == Stage::Approval && !include_approval {
                continue;
            }
            if !registry::spec(stage).is_ready(&item, now) {
                continue;
            }
            match self.queues.try_enqueue(&item.item_id, stage) {
                EnqueueResult::Queued if stage == Stage::Approval => stats.approval_polls += 1,
                EnqueueResult::Queued => stats.enqueued += 1,
                EnqueueResult::Duplicate => {}
                EnqueueResult::Full => stats.deferred += 1,
                EnqueueResult::Closed => break,
            }
        }
        stats
    }

    /// Jobs queued or running, excluding approval polls.
    fn production_in_flight(&self) -> usize {
        self.deps
            .in_flight
            .iter()
            .filter(|entry| entry.key().1 != Stage::Approval)
            .count()
    }

    /// Whether any item still has work the drain should wait for. Items
    /// awaiting the operator do not count; a scheduled retry counts while
    /// it lands inside the drain horizon.
    fn has_pending_work(&self) -> bool {
        if self.production_in_flight() > 0 {
            return true;
        }
        let now = Utc::now();
        let horizon = now + chrono::Duration::seconds(RETRY_DRAIN_HORIZON_SECS);
        self.deps.db.list().iter().any(|item| match &item.state {
            ItemState::PendingApproval => false,
            ItemState::RetryableError { after_ts, .. } => *after_ts <= horizon,
            state if state.is_terminal() => false,
            _ => true,
        })
    }

    /// The daily full pass: ideation, trend ingest, and GC.
    async fn daily_pass(&self) {
        let settings = &self.deps.settings;
        if let Err(e) = self
            .deps
            .adapters
            .ideation
            .run(&self.deps.db, &self.deps.locks, settings.ideas_per_run)
            .await
        {
            warn!(error = %e, "ideation pass failed");
        }
        if let Some(ref trend) = self.deps.adapters.trend_ingest {
            if let Err(e) = trend.run(&self.deps.db, &self.deps.locks).await {
                warn!(error = %e, "trend ingest pass failed");
            }
        }
        if let Err(e) = self.collect_garbage().await {
            warn!(error = %e, "garbage collection failed");
        }
        info!("{}", self.health().render());
    }

    /// Single pass mode: daily work, discovery, drain, shutdown.
    pub async fn run_once(self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        info!("starting single production pass");
        self.daily_pass().await;

        // Approval rows are polled once; re-polling is the loop mode's job.
        let mut first_pass = true;
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let stats = self.discover(first_pass).await;
            first_pass = false;
            if stats.enqueued == 0 && !self.has_pending_work() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        self.shutdown(shutdown.is_cancelled()).await
    }

    /// Continuous mode: periodic discovery plus the daily pass at the
    /// configured local time. The approval watch is discovery itself.
    pub async fn run_loop(self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        let interval = self.deps.settings.discovery_interval;
        let (daily_hour, daily_minute) = self.deps.settings.daily_at;
        info!(
            interval_secs = interval.as_secs(),
            daily_at = format!("{:02}:{:02}", daily_hour, daily_minute),
            "starting supervision loop"
        );

        let mut last_daily: Option<u32> = None;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let now = Local::now();
            let due_today = now.hour() > daily_hour
                || (now.hour() == daily_hour && now.minute() >= daily_minute);
            if due_today && last_daily != Some(now.ordinal()) {
                last_daily = Some(now.ordinal());
                self.daily_pass().await;
            }

            let stats = self.discover_once().await;
            if stats.enqueued > 0 || stats.adopted > 0 {
                info!(
                    enqueued = stats.enqueued,
                    adopted = stats.adopted,
                    deferred = stats.deferred,
                    "discovery pass"
                );
            }
        }

        self.shutdown(true).await
    }

    /// Graceful drain: stop accepting work, let running jobs finish inside
    /// the drain deadline, then cancel what remains and persist breakers.
    async fn shutdown(mut self, interrupted: bool) -> Result<(), SupervisorError> {
        info!(interrupted, "supervisor draining");
        // Closing the queues stops workers after their current job
        self.queues.close();

        let drain = self.deps.settings.drain_deadline;
        let pools = futures::future::join_all(self.pools.drain(..));
        if tokio::time::timeout(drain, pools).await.is_err() {
            warn!(deadline_secs = drain.as_secs(), "drain deadline hit, cancelling running jobs");
            self.workers_shutdown.cancel();
        }

        if let Some(ref caller) = self.caller {
            caller.save_breakers(&self.layout.breakers_file())?;
        }
        info!("supervisor stopped");
        Ok(())
    }

    /// Current pipeline health.
    pub fn health(&self) -> HealthReport {
        let items = self.deps.db.list();
        let mut report = HealthReport {
            in_flight: self.queues.in_flight_count(),
            items_total: items.len(),
            metrics: self.deps.metrics.snapshot(),
            breakers: self
                .caller
                .as_ref()
                .map(|c| c.breaker_snapshots())
                .unwrap_or_default(),
            ..Default::default()
        };
        for item in &items {
            match &item.state {
                ItemState::PendingApproval => report.items_pending_approval += 1,
                ItemState::Published => report.items_published += 1,
                ItemState::Failed { .. } => report.items_failed += 1,
                ItemState::RetryableError { .. } => report.items_awaiting_retry += 1,
                _ => report.items_in_progress += 1,
            }
        }
        report
    }

    /// Operator reset: re-enter a failed item at its last successful state.
    pub async fn reset_item(&self, item_id: &str) -> Result<(), SupervisorError> {
        let guard = self.deps.locks.acquire(item_id).await;
        let Some(mut item) = self.deps.db.get(item_id) else {
            warn!(item_id, "reset requested for unknown item");
            return Ok(());
        };
        let ItemState::Failed { stage } = item.state.clone() else {
            warn!(item_id, state = %item.state, "reset requested for non-failed item");
            return Ok(());
        };

        item.state = ItemState::ready_for(stage);
        item.error = None;
        item.stage_attempts.remove(stage.as_str());
        item.touch();
        self.deps.db.commit(&guard, &item)?;

        let label = item.state.dashboard_label();
        if let Err(e) = self
            .deps
            .dashboard
            .update_fields(
                item_id,
                crate::dashboard::RowPatch {
                    status: RowStatus::parse(label),
                    error: Some(String::new()),
                    ..Default::default()
                },
                None,
            )
            .await
        {
            warn!(item_id, error = %e, "dashboard update failed during reset");
        }
        info!(item_id, stage = %stage, state = %item.state, "item reset");
        Ok(())
    }

    /// One garbage collection pass over terminal items.
    pub async fn collect_garbage(&self) -> Result<GcReport, SupervisorError> {
        let candidates: Vec<GcCandidate> = self
            .deps
            .db
            .list()
            .into_iter()
            .filter(|item| item.state.is_terminal())
            .map(|item| GcCandidate {
                item_id: item.item_id,
                terminal_since: item.updated_at,
            })
            .collect();
        let report = collect_garbage(
            &self.deps.store,
            &self.deps.locks,
            &candidates,
            self.deps.settings.retention,
            Utc::now(),
        )
        .await?;
        Ok(report)
    }
}
