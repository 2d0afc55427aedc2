use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::{exporter::FeatureExporter, registry::ModelRegistry, trainer::ModelTrainer};
use crate::{
    error::{AppError, TrainingFailure},
    models::{Hyperparameters, ModelSummary},
};

#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Period of the retrain timer; `None` disables it
    pub interval: Option<Duration>,
    /// New ratings that trigger a retrain; `None` disables the trigger
    pub rating_threshold: Option<u64>,
    pub training_timeout: Option<Duration>,
    /// Run one cycle as soon as the scheduler task starts
    pub run_on_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Exporting,
    Training,
    Publishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Startup,
    Interval,
    RatingThreshold,
    Manual,
}

/// What a call to [`RetrainScheduler::run_cycle`] did
#[derive(Debug)]
pub enum CycleOutcome {
    Published(ModelSummary),
    /// Another cycle was already running; this trigger was folded into a rerun
    Coalesced,
    Failed { stage: CycleState, error: AppError },
}

/// The last finished cycle, as reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub published_version: Option<u64>,
    pub failed_stage: Option<CycleState>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: CycleState,
    pub pending_ratings: u64,
    pub rerun_requested: bool,
    pub last_cycle: Option<CycleRecord>,
}

#[derive(Debug)]
struct Progress {
    state: CycleState,
    last_cycle: Option<CycleRecord>,
}

/// Runs export, train and publish cycles one at a time.
///
/// Cycles are started by a timer, by accumulated new ratings, or on request.
/// A trigger that arrives while a cycle is running never starts a second one;
/// it is collapsed into a single follow-up run. Every failure stays inside the
/// cycle: it is logged and recorded, and the active model is left alone.
pub struct RetrainScheduler {
    exporter: FeatureExporter,
    trainer: ModelTrainer,
    hyperparameters: Hyperparameters,
    registry: Arc<ModelRegistry>,
    options: SchedulerOptions,
    progress: Mutex<Progress>,
    new_ratings: AtomicU64,
    rerun: AtomicBool,
    manual_requested: AtomicBool,
    wake: Notify,
}

/// Resets the state to idle however the cycle ends
struct IdleOnDrop<'a>(&'a Mutex<Progress>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.lock().state = CycleState::Idle;
    }
}

impl RetrainScheduler {
    pub fn new(
        exporter: FeatureExporter,
        trainer: ModelTrainer,
        hyperparameters: Hyperparameters,
        registry: Arc<ModelRegistry>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            exporter,
            trainer,
            hyperparameters,
            registry,
            options,
            progress: Mutex::new(Progress {
                state: CycleState::Idle,
                last_cycle: None,
            }),
            new_ratings: AtomicU64::new(0),
            rerun: AtomicBool::new(false),
            manual_requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let progress = self.progress.lock();
        SchedulerStatus {
            state: progress.state,
            pending_ratings: self.new_ratings.load(Ordering::Relaxed),
            rerun_requested: self.rerun.load(Ordering::Relaxed),
            last_cycle: progress.last_cycle.clone(),
        }
    }

    /// Counts an accepted rating and wakes the scheduler once the threshold
    /// is reached
    pub fn record_new_rating(&self) {
        let pending = self.new_ratings.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(threshold) = self.options.rating_threshold {
            if pending >= threshold {
                self.wake.notify_one();
            }
        }
    }

    /// Asks the background task for a cycle as soon as it is free
    pub fn request_retrain(&self) {
        self.manual_requested.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }

    /// Runs a single cycle, or records a rerun request if one is in flight
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleOutcome {
        {
            let mut progress = self.progress.lock();
            if progress.state != CycleState::Idle {
                self.rerun.store(true, Ordering::Relaxed);
                tracing::info!(
                    ?trigger,
                    state = ?progress.state,
                    "Retrain already running, coalescing trigger"
                );
                return CycleOutcome::Coalesced;
            }
            progress.state = CycleState::Exporting;
        }
        let _idle = IdleOnDrop(&self.progress);

        let started_at = Utc::now();
        tracing::info!(?trigger, "Retrain cycle started");

        let outcome = match self.execute().await {
            Ok(summary) => {
                tracing::info!(
                    ?trigger,
                    version = summary.version,
                    rmse = ?summary.rmse,
                    "Retrain cycle published a new model"
                );
                CycleOutcome::Published(summary)
            }
            Err((stage, error)) => {
                tracing::error!(
                    ?trigger,
                    ?stage,
                    error = %error,
                    active_version = self.registry.active().version,
                    "Retrain cycle failed, keeping the active model"
                );
                CycleOutcome::Failed { stage, error }
            }
        };

        let record = CycleRecord {
            trigger,
            started_at,
            finished_at: Utc::now(),
            published_version: match &outcome {
                CycleOutcome::Published(summary) => Some(summary.version),
                _ => None,
            },
            failed_stage: match &outcome {
                CycleOutcome::Failed { stage, .. } => Some(*stage),
                _ => None,
            },
            error: match &outcome {
                CycleOutcome::Failed { error, .. } => Some(error.to_string()),
                _ => None,
            },
        };
        self.progress.lock().last_cycle = Some(record);

        outcome
    }

    async fn execute(&self) -> Result<ModelSummary, (CycleState, AppError)> {
        let counted = self.new_ratings.load(Ordering::Relaxed);
        let dataset = self
            .exporter
            .export()
            .await
            .map_err(|e| (CycleState::Exporting, e))?;
        // Only ratings counted before the snapshot are settled by it; the
        // pending count survives a failed export for the next trigger
        self.new_ratings.fetch_sub(counted, Ordering::Relaxed);

        self.set_state(CycleState::Training);
        let version = self.registry.next_version();
        let trainer = self.trainer.clone();
        let hyperparameters = self.hyperparameters;
        let training =
            tokio::task::spawn_blocking(move || trainer.train(&dataset, &hyperparameters, version));

        let joined = match self.options.training_timeout {
            // The blocking thread cannot be interrupted; its result is discarded
            Some(limit) => tokio::time::timeout(limit, training).await.map_err(|_| {
                (
                    CycleState::Training,
                    AppError::from(TrainingFailure::Timeout(limit)),
                )
            })?,
            None => training.await,
        };
        let artifact = joined
            .map_err(|e| {
                (
                    CycleState::Training,
                    AppError::Internal(format!("Training task failed: {}", e)),
                )
            })?
            .map_err(|e| (CycleState::Training, AppError::from(e)))?;

        self.set_state(CycleState::Publishing);
        let published = self
            .registry
            .publish(artifact)
            .await
            .map_err(|e| (CycleState::Publishing, e))?;

        Ok(published.summary())
    }

    fn set_state(&self, state: CycleState) {
        self.progress.lock().state = state;
    }

    fn next_trigger(&self) -> Trigger {
        if self.manual_requested.swap(false, Ordering::Relaxed) {
            Trigger::Manual
        } else {
            Trigger::RatingThreshold
        }
    }

    /// Runs `trigger`'s cycle, then one more for each batch of coalesced
    /// triggers until none are pending
    async fn run_until_settled(&self, trigger: Trigger) {
        let mut trigger = trigger;
        loop {
            self.run_cycle(trigger).await;
            if !self.rerun.swap(false, Ordering::Relaxed) {
                break;
            }
            trigger = self.next_trigger();
        }
    }

    /// Starts the background task that owns all scheduled cycles
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            tracing::info!(
                interval = ?self.options.interval,
                rating_threshold = ?self.options.rating_threshold,
                "Retrain scheduler started"
            );

            if self.options.run_on_start {
                self.run_until_settled(Trigger::Startup).await;
            }

            let mut ticker = self.options.interval.map(|period| {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker
            });

            loop {
                let trigger = tokio::select! {
                    _ = tick(&mut ticker) => Trigger::Interval,
                    _ = self.wake.notified() => self.next_trigger(),
                    _ = shutdown_rx.recv() => break,
                };
                self.run_until_settled(trigger).await;
            }

            tracing::info!("Retrain scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, task }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle for stopping the scheduler task. A cycle in progress finishes first.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Retrain scheduler task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ratings::MockRatingStore;
    use crate::db::{InMemoryRatingStore, RatingStore};
    use crate::models::ModelArtifact;
    use crate::services::trainer::TrainerOptions;

    fn quick_hp() -> Hyperparameters {
        Hyperparameters {
            factors: 2,
            learning_rate: 0.01,
            regularization: 0.02,
            epochs: 20,
        }
    }

    fn scheduler(
        store: Arc<dyn RatingStore>,
        hyperparameters: Hyperparameters,
        options: SchedulerOptions,
    ) -> (Arc<RetrainScheduler>, Arc<ModelRegistry>) {
        let registry = Arc::new(ModelRegistry::new(ModelArtifact::empty()));
        let trainer = ModelTrainer::new(TrainerOptions {
            divergence_window: 0,
            ..TrainerOptions::default()
        });
        let scheduler = RetrainScheduler::new(
            FeatureExporter::new(store),
            trainer,
            hyperparameters,
            registry.clone(),
            options,
        );
        (Arc::new(scheduler), registry)
    }

    async fn seeded_store() -> Arc<InMemoryRatingStore> {
        let store = Arc::new(InMemoryRatingStore::new());
        for (user, movie, value) in [(1, 10, 5), (1, 11, 1), (2, 10, 4)] {
            store.put(user, movie, value, Utc::now()).await.unwrap();
        }
        store
    }

    async fn dense_store() -> Arc<InMemoryRatingStore> {
        let store = Arc::new(InMemoryRatingStore::new());
        for user in 1..=30i64 {
            for movie in 1..=20i64 {
                let value = 1 + (user * 3 + movie) % 5;
                store.put(user, movie, value, Utc::now()).await.unwrap();
            }
        }
        store
    }

    #[tokio::test]
    async fn test_cycle_publishes_new_model() {
        let (scheduler, registry) =
            scheduler(seeded_store().await, quick_hp(), SchedulerOptions::default());

        let outcome = scheduler.run_cycle(Trigger::Manual).await;
        let CycleOutcome::Published(summary) = outcome else {
            panic!("expected a published model, got {:?}", outcome);
        };
        assert_eq!(summary.version, 1);
        assert_eq!(registry.active().version, 1);

        let status = scheduler.status();
        assert_eq!(status.state, CycleState::Idle);
        assert_eq!(status.last_cycle.unwrap().published_version, Some(1));
    }

    #[tokio::test]
    async fn test_empty_store_leaves_active_model_untouched() {
        let store = Arc::new(InMemoryRatingStore::new());
        let (scheduler, registry) = scheduler(store, quick_hp(), SchedulerOptions::default());
        let before = registry.active();

        let outcome = scheduler.run_cycle(Trigger::Manual).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                stage: CycleState::Training,
                error: AppError::TrainingFailure(TrainingFailure::EmptyDataset),
            }
        ));
        assert!(Arc::ptr_eq(&before, &registry.active()));
        assert_eq!(scheduler.status().state, CycleState::Idle);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_at_export() {
        let mut store = MockRatingStore::new();
        store
            .expect_export_snapshot()
            .returning(|| Err(AppError::Database(sqlx::Error::PoolTimedOut)));
        let (scheduler, registry) =
            scheduler(Arc::new(store), quick_hp(), SchedulerOptions::default());
        let before = registry.active();

        let outcome = scheduler.run_cycle(Trigger::Interval).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                stage: CycleState::Exporting,
                error: AppError::SourceUnavailable(_),
            }
        ));
        assert!(Arc::ptr_eq(&before, &registry.active()));

        let record = scheduler.status().last_cycle.unwrap();
        assert_eq!(record.failed_stage, Some(CycleState::Exporting));
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn test_failed_export_keeps_pending_ratings() {
        let mut store = MockRatingStore::new();
        store
            .expect_export_snapshot()
            .returning(|| Err(AppError::Database(sqlx::Error::PoolTimedOut)));
        let options = SchedulerOptions {
            rating_threshold: Some(3),
            ..SchedulerOptions::default()
        };
        let (scheduler, _) = scheduler(Arc::new(store), quick_hp(), options);

        for _ in 0..3 {
            scheduler.record_new_rating();
        }
        let outcome = scheduler.run_cycle(Trigger::RatingThreshold).await;
        assert!(matches!(outcome, CycleOutcome::Failed { .. }));
        assert_eq!(scheduler.status().pending_ratings, 3);
    }

    #[tokio::test]
    async fn test_successful_export_settles_pending_ratings() {
        let (scheduler, _) =
            scheduler(seeded_store().await, quick_hp(), SchedulerOptions::default());

        for _ in 0..3 {
            scheduler.record_new_rating();
        }
        let outcome = scheduler.run_cycle(Trigger::RatingThreshold).await;
        assert!(matches!(outcome, CycleOutcome::Published(_)));
        assert_eq!(scheduler.status().pending_ratings, 0);
    }

    #[tokio::test]
    async fn test_training_timeout_is_a_training_failure() {
        let hp = Hyperparameters {
            factors: 16,
            epochs: 2_000,
            ..quick_hp()
        };
        let options = SchedulerOptions {
            training_timeout: Some(Duration::from_millis(1)),
            ..SchedulerOptions::default()
        };
        let (scheduler, registry) = scheduler(dense_store().await, hp, options);

        let outcome = scheduler.run_cycle(Trigger::Manual).await;
        assert!(matches!(
            outcome,
            CycleOutcome::Failed {
                stage: CycleState::Training,
                error: AppError::TrainingFailure(TrainingFailure::Timeout(_)),
            }
        ));
        assert_eq!(registry.active().version, 0);
    }

    #[tokio::test]
    async fn test_trigger_during_cycle_is_coalesced() {
        let (scheduler, registry) =
            scheduler(seeded_store().await, quick_hp(), SchedulerOptions::default());

        scheduler.set_state(CycleState::Training);
        let outcome = scheduler.run_cycle(Trigger::RatingThreshold).await;
        assert!(matches!(outcome, CycleOutcome::Coalesced));
        assert!(scheduler.status().rerun_requested);
        assert_eq!(registry.active().version, 0);

        scheduler.set_state(CycleState::Idle);
        scheduler.run_until_settled(Trigger::Manual).await;
        assert!(!scheduler.status().rerun_requested);
        // The original cycle plus exactly one collapsed rerun
        assert_eq!(registry.active().version, 2);
    }

    #[tokio::test]
    async fn test_rating_threshold_wakes_background_task() {
        let store = seeded_store().await;
        let options = SchedulerOptions {
            rating_threshold: Some(2),
            ..SchedulerOptions::default()
        };
        let (scheduler, registry) = scheduler(store.clone(), quick_hp(), options);
        let handle = Arc::clone(&scheduler).spawn();

        store.put(3, 10, 2, Utc::now()).await.unwrap();
        scheduler.record_new_rating();
        assert_eq!(registry.active().version, 0);
        store.put(3, 11, 4, Utc::now()).await.unwrap();
        scheduler.record_new_rating();

        let deadline = Instant::now() + Duration::from_secs(10);
        while registry.active().version == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.active().version >= 1);
        assert!(registry.active().knows_user(3));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_on_start_publishes_before_any_trigger() {
        let options = SchedulerOptions {
            run_on_start: true,
            ..SchedulerOptions::default()
        };
        let (scheduler, registry) = scheduler(seeded_store().await, quick_hp(), options);
        let handle = Arc::clone(&scheduler).spawn();

        let deadline = Instant::now() + Duration::from_secs(10);
        while registry.active().version == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.active().version, 1);
        assert_eq!(
            scheduler.status().last_cycle.unwrap().trigger,
            Trigger::Startup
        );

        handle.shutdown().await;
    }
}
