//! Incremental Analysis Scheduler: decides when accumulated feedback is worth
//! an LLM call, and hands admitted batches to the pipeline.
//!
//! Intake: `enqueue` never blocks. Items go through a bounded channel that the
//! tick drains into the backlog; when the channel is full a tracked task waits
//! for room until the scheduler is cancelled, then drops the item (logged).
//!
//! Admission runs on every tick, never on enqueue, so bursts are batched:
//! threshold → debounce → plan → remove selected by id → dispatch.
//!
//! One `CancellationToken` governs the tick loop, every dispatch and every
//! pending intake handoff; one `TaskTracker` lets `stop` wait for all of them.
//!
//! The prior snapshot read by the tick is the one the batch is planned against
//! and the one handed to the pipeline. Overlapping dispatches may therefore
//! name the same predecessor; the chain is informational only and this is
//! accepted rather than serialising the whole pipeline.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::analyzer::FeedbackAnalyzer;
use crate::analysis::backlog::Backlog;
use crate::analysis::pipeline::perform_analysis;
use crate::analysis::planner::plan;
use crate::analysis::repository::AnalysisRepository;
use crate::config::AnalysisConfig;
use crate::models::analysis::{AnalysisSnapshot, AnalysisStatus};
use crate::models::feedback::PendingItem;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler has been stopped and cannot be restarted")]
    Stopped,

    #[error("Scheduler shutdown timed out after {deadline:?} with {outstanding} task(s) still running")]
    ShutdownTimeout {
        deadline: Duration,
        outstanding: usize,
    },
}

/// What a single tick decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Stopped,
    BelowThreshold { pending: usize, required: usize },
    Debounced { remaining: Duration },
    /// The oldest item alone exceeds the token budget.
    NothingFits { pending: usize },
    PriorLookupFailed,
    Dispatched { batch_size: usize, deferred: usize },
}

/// Read-side view of the scheduler for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub pending: usize,
    pub queued_intake: usize,
    pub in_flight: usize,
    pub last_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

/// Debounce clock. Separate lock domain from the backlog.
#[derive(Debug, Default)]
struct CompletionClock {
    last: Mutex<Option<(Instant, DateTime<Utc>)>>,
}

impl CompletionClock {
    fn mark(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((Instant::now(), Utc::now()));
    }

    fn elapsed(&self) -> Option<Duration> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|(at, _)| at.elapsed())
    }

    fn wall_time(&self) -> Option<DateTime<Utc>> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|(_, wall)| wall)
    }
}

/// Held by every dispatch task. Dropping it, even while unwinding from a
/// panic, advances the debounce clock and releases the in-flight slot.
struct DispatchGuard {
    inner: Arc<SchedulerInner>,
}

impl DispatchGuard {
    fn acquire(inner: Arc<SchedulerInner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        // Failed attempts count too, so a failing provider is not hammered.
        self.inner.clock.mark();
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SchedulerInner {
    config: AnalysisConfig,
    repo: Arc<dyn AnalysisRepository>,
    analyzer: Arc<dyn FeedbackAnalyzer>,
    backlog: Backlog,
    intake_tx: mpsc::Sender<PendingItem>,
    intake_rx: Mutex<mpsc::Receiver<PendingItem>>,
    clock: CompletionClock,
    lifecycle: Mutex<Lifecycle>,
    in_flight: AtomicUsize,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Cheap to clone; all clones drive the same scheduler.
#[derive(Clone)]
pub struct AnalysisScheduler {
    inner: Arc<SchedulerInner>,
}

impl AnalysisScheduler {
    pub fn new(
        config: AnalysisConfig,
        repo: Arc<dyn AnalysisRepository>,
        analyzer: Arc<dyn FeedbackAnalyzer>,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.max(1));
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                repo,
                analyzer,
                backlog: Backlog::default(),
                intake_tx,
                intake_rx: Mutex::new(intake_rx),
                clock: CompletionClock::default(),
                lifecycle: Mutex::new(Lifecycle::Idle),
                in_flight: AtomicUsize::new(0),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Intake
    // ────────────────────────────────────────────────────────────────────────

    /// Hands a committed feedback item to the scheduler without blocking.
    pub fn enqueue(&self, item: PendingItem) {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            warn!("Dropping feedback {}: analysis scheduler is stopped", item.id);
            return;
        }

        match inner.intake_tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                debug!("Intake full, deferring handoff of feedback {}", item.id);
                let tx = inner.intake_tx.clone();
                let cancel = inner.cancel.clone();
                inner.tracker.spawn(async move {
                    let id = item.id;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            warn!("Dropping feedback {id}: scheduler stopped before intake had room");
                        }
                        sent = tx.send(item) => {
                            if sent.is_err() {
                                warn!("Dropping feedback {id}: intake channel closed");
                            }
                        }
                    }
                });
            }
            Err(TrySendError::Closed(item)) => {
                warn!("Dropping feedback {}: intake channel closed", item.id);
            }
        }
    }

    /// Moves everything currently in the intake channel into the backlog.
    fn drain_intake(&self) -> usize {
        let mut rx = self
            .inner
            .intake_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut moved = 0;
        loop {
            match rx.try_recv() {
                Ok(item) => {
                    if self.inner.backlog.push(item) {
                        moved += 1;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        moved
    }

    // ────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ────────────────────────────────────────────────────────────────────────

    /// Starts the periodic tick loop. Can be called once; a stopped scheduler
    /// cannot be restarted.
    pub fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut lifecycle = self
                .inner
                .lifecycle
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Err(SchedulerError::AlreadyRunning),
                Lifecycle::Stopped => return Err(SchedulerError::Stopped),
            }
        }

        let scheduler = self.clone();
        self.inner.tracker.spawn(async move { scheduler.run_loop().await });

        info!(
            "Analysis scheduler started (tick every {:?}, threshold {}, max {} items / {} tokens, debounce {:?})",
            self.inner.config.tick_interval,
            self.inner.config.min_new_feedbacks_for_analysis,
            self.inner.config.max_feedbacks_in_context,
            self.inner.config.max_tokens_per_request,
            self.inner.config.debounce_interval()
        );
        Ok(())
    }

    async fn run_loop(self) {
        let period = self.inner.config.tick_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let outcome = self.tick().await;
                    debug!("Analysis tick: {:?}", outcome);
                }
            }
        }
        debug!("Analysis tick loop exited");
    }

    /// Cancels the tick loop, in-flight analyses and pending intake handoffs,
    /// then waits for them up to `deadline`.
    pub async fn stop(&self, deadline: Duration) -> Result<(), SchedulerError> {
        *self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Lifecycle::Stopped;
        self.inner.cancel.cancel();
        self.inner.tracker.close();

        let waited = tokio::time::timeout(deadline, self.inner.tracker.wait()).await;

        self.drain_intake();
        let dropped = self.inner.backlog.clear();
        if dropped > 0 {
            warn!("Analysis scheduler stopped with {dropped} unanalysed feedback item(s) in the backlog");
        }

        match waited {
            Ok(()) => {
                info!("Analysis scheduler stopped");
                Ok(())
            }
            Err(_) => {
                let outstanding = self.inner.tracker.len();
                error!("Analysis scheduler shutdown timed out with {outstanding} task(s) outstanding");
                Err(SchedulerError::ShutdownTimeout {
                    deadline,
                    outstanding,
                })
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Admission + dispatch
    // ────────────────────────────────────────────────────────────────────────

    /// Evaluates the admission policy once and dispatches at most one batch.
    pub async fn tick(&self) -> TickOutcome {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return TickOutcome::Stopped;
        }

        self.drain_intake();

        let required = inner.config.min_new_feedbacks_for_analysis;
        if inner.backlog.is_empty() {
            return TickOutcome::BelowThreshold {
                pending: 0,
                required,
            };
        }
        let pending = inner.backlog.len();
        if pending < required {
            return TickOutcome::BelowThreshold { pending, required };
        }

        if let Some(window) = inner.config.debounce_interval() {
            if let Some(elapsed) = inner.clock.elapsed() {
                if elapsed < window {
                    return TickOutcome::Debounced {
                        remaining: window - elapsed,
                    };
                }
            }
        }

        let prior = match inner.repo.latest_snapshot().await {
            Ok(prior) => prior,
            Err(e) => {
                warn!("Skipping analysis tick: could not load previous analysis: {e}");
                return TickOutcome::PriorLookupFailed;
            }
        };

        let candidates = inner.backlog.snapshot();
        let selection = plan(
            &candidates,
            prior.as_ref(),
            inner.config.max_tokens_per_request,
            inner.config.max_feedbacks_in_context,
        );

        if selection.is_empty() {
            warn!(
                "Skipping analysis tick: oldest pending feedback alone exceeds the {}-token budget ({} pending)",
                inner.config.max_tokens_per_request, pending
            );
            return TickOutcome::NothingFits { pending };
        }

        let selected_ids: HashSet<Uuid> = selection.selected.iter().map(|i| i.id).collect();
        inner.backlog.remove_ids(&selected_ids);
        let deferred = selection.remaining.len();
        let batch_size = selection.selected.len();

        info!(
            "Dispatching analysis of {} feedback items (~{} tokens, {} deferred)",
            batch_size, selection.estimated_tokens, deferred
        );
        self.dispatch(selection.selected, prior);

        TickOutcome::Dispatched {
            batch_size,
            deferred,
        }
    }

    fn dispatch(&self, batch: Vec<PendingItem>, prior: Option<AnalysisSnapshot>) {
        let guard = DispatchGuard::acquire(Arc::clone(&self.inner));

        self.inner.tracker.spawn(async move {
            let inner = &guard.inner;
            let result = perform_analysis(
                inner.repo.as_ref(),
                inner.analyzer.as_ref(),
                batch,
                prior,
                &inner.cancel,
            )
            .await;
            drop(guard);

            match result {
                Ok(report) if report.snapshot.status == AnalysisStatus::Success => {
                    debug!(
                        "Analysis {} finished with {} topic(s) and {} warning(s)",
                        report.snapshot.id,
                        report.topics.len(),
                        report.warnings.len()
                    );
                }
                Ok(report) => {
                    warn!(
                        "Analysis {} recorded as {}: {}",
                        report.snapshot.id,
                        report.snapshot.status,
                        report.snapshot.failure_reason.as_deref().unwrap_or("unknown reason")
                    );
                }
                Err(e) => error!("Analysis dispatch error: {e}"),
            }
        });
    }

    // ────────────────────────────────────────────────────────────────────────
    // Introspection
    // ────────────────────────────────────────────────────────────────────────

    pub fn status(&self) -> SchedulerStatus {
        let inner = &self.inner;
        let lifecycle = *inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        SchedulerStatus {
            running: lifecycle == Lifecycle::Running,
            pending: inner.backlog.len(),
            queued_intake: inner.intake_tx.max_capacity() - inner.intake_tx.capacity(),
            in_flight: inner.in_flight.load(Ordering::SeqCst),
            last_completed_at: inner.clock.wall_time(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::pipeline::CANCELLED_REASON;
    use crate::analysis::test_support::{
        pending_items, InMemoryAnalysisRepository, Scripted, ScriptedAnalyzer,
    };

    fn config(min: usize, max_items: usize) -> AnalysisConfig {
        AnalysisConfig {
            min_new_feedbacks_for_analysis: min,
            max_feedbacks_in_context: max_items,
            max_tokens_per_request: 1_000_000,
            ..AnalysisConfig::default()
        }
    }

    fn scheduler(
        config: AnalysisConfig,
        analyzer: ScriptedAnalyzer,
    ) -> (
        AnalysisScheduler,
        Arc<InMemoryAnalysisRepository>,
        Arc<ScriptedAnalyzer>,
    ) {
        let repo = Arc::new(InMemoryAnalysisRepository::default());
        let analyzer = Arc::new(analyzer);
        let scheduler = AnalysisScheduler::new(config, repo.clone(), analyzer.clone());
        (scheduler, repo, analyzer)
    }

    async fn wait_idle(scheduler: &AnalysisScheduler) {
        while scheduler.status().in_flight > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_below_threshold_does_not_dispatch() {
        let (scheduler, repo, analyzer) = scheduler(config(10, 10), ScriptedAnalyzer::default());
        for item in pending_items(9) {
            scheduler.enqueue(item);
        }

        let outcome = scheduler.tick().await;

        assert_eq!(
            outcome,
            TickOutcome::BelowThreshold {
                pending: 9,
                required: 10
            }
        );
        assert_eq!(analyzer.call_count(), 0);
        assert!(repo.snapshots().is_empty());
        assert_eq!(scheduler.status().pending, 9, "backlog untouched");
    }

    #[tokio::test]
    async fn test_oldest_ten_dispatched_and_two_remain() {
        let (scheduler, repo, analyzer) = scheduler(config(10, 10), ScriptedAnalyzer::default());
        let items = pending_items(12);
        for item in &items {
            scheduler.enqueue(item.clone());
        }

        let outcome = scheduler.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Dispatched {
                batch_size: 10,
                deferred: 2
            }
        );
        assert_eq!(scheduler.status().pending, 2);

        wait_idle(&scheduler).await;

        let snapshots = repo.snapshots();
        assert_eq!(snapshots.len(), 1, "exactly one snapshot per dispatch");
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.status, AnalysisStatus::Success);
        assert_eq!(snapshot.feedback_count, 10);
        assert_eq!(
            repo.status_history(snapshot.id),
            vec![AnalysisStatus::Processing, AnalysisStatus::Success]
        );

        let mut members = repo.members(snapshot.id);
        members.sort();
        let mut oldest: Vec<Uuid> = items[..10].iter().map(|i| i.id).collect();
        oldest.sort();
        assert_eq!(members, oldest, "FIFO: the oldest ten were analysed");
        assert_eq!(analyzer.batch_sizes.lock().unwrap().as_slice(), &[10]);
    }

    #[tokio::test]
    async fn test_llm_failure_is_recorded_and_not_requeued() {
        let (scheduler, repo, _) = scheduler(
            config(3, 10),
            ScriptedAnalyzer::new(vec![Scripted::Fail("bad gateway".into())]),
        );
        for item in pending_items(3) {
            scheduler.enqueue(item);
        }
        assert!(scheduler.status().last_completed_at.is_none());

        scheduler.tick().await;
        wait_idle(&scheduler).await;

        let snapshot = repo.snapshots().remove(0);
        assert_eq!(snapshot.status, AnalysisStatus::Failed);
        assert!(!snapshot.failure_reason.unwrap_or_default().is_empty());
        assert_eq!(scheduler.status().pending, 0, "failed batch is not re-enqueued");
        assert!(
            scheduler.status().last_completed_at.is_some(),
            "failures advance the debounce clock"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_limits_dispatches() {
        let mut cfg = config(5, 5);
        cfg.enable_debounce = true;
        cfg.debounce_minutes = 5;
        let (scheduler, repo, analyzer) = scheduler(cfg, ScriptedAnalyzer::default());
        for item in pending_items(20) {
            scheduler.enqueue(item);
        }

        assert!(matches!(
            scheduler.tick().await,
            TickOutcome::Dispatched { batch_size: 5, .. }
        ));
        wait_idle(&scheduler).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(matches!(
            scheduler.tick().await,
            TickOutcome::Debounced { .. }
        ));
        assert_eq!(analyzer.call_count(), 1, "one dispatch inside the window");

        tokio::time::advance(Duration::from_secs(240)).await;
        assert!(matches!(
            scheduler.tick().await,
            TickOutcome::Dispatched { batch_size: 5, .. }
        ));
        wait_idle(&scheduler).await;
        assert_eq!(repo.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_first_item_is_a_noop() {
        let mut cfg = config(1, 10);
        cfg.max_tokens_per_request = 500;
        let (scheduler, repo, analyzer) = scheduler(cfg, ScriptedAnalyzer::default());
        for item in pending_items(3) {
            scheduler.enqueue(item);
        }

        assert_eq!(scheduler.tick().await, TickOutcome::NothingFits { pending: 3 });
        assert_eq!(scheduler.status().pending, 3);
        assert_eq!(analyzer.call_count(), 0);
        assert!(repo.snapshots().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_counts_once() {
        let (scheduler, _, _) = scheduler(config(10, 10), ScriptedAnalyzer::default());
        let item = pending_items(1).remove(0);
        scheduler.enqueue(item.clone());
        scheduler.enqueue(item);

        scheduler.tick().await;
        assert_eq!(scheduler.status().pending, 1);
    }

    #[tokio::test]
    async fn test_full_intake_does_not_block_or_lose_items() {
        let mut cfg = config(100, 10);
        cfg.intake_capacity = 1;
        let (scheduler, _, _) = scheduler(cfg, ScriptedAnalyzer::default());

        for item in pending_items(5) {
            scheduler.enqueue(item);
        }

        for _ in 0..50 {
            scheduler.tick().await;
            if scheduler.status().pending == 5 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.status().pending, 5);
    }

    #[tokio::test]
    async fn test_enqueue_after_stop_is_dropped() {
        let (scheduler, _, _) = scheduler(config(1, 10), ScriptedAnalyzer::default());
        scheduler.stop(Duration::from_secs(1)).await.unwrap();

        scheduler.enqueue(pending_items(1).remove(0));
        assert_eq!(scheduler.tick().await, TickOutcome::Stopped);
        assert_eq!(scheduler.status().pending, 0);
    }

    #[tokio::test]
    async fn test_start_twice_and_restart_are_rejected() {
        let (scheduler, _, _) = scheduler(config(1, 10), ScriptedAnalyzer::default());
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyRunning)));

        scheduler.stop(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::Stopped)));
        assert!(!scheduler.status().running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_dispatches_on_interval() {
        let (scheduler, repo, _) = scheduler(config(4, 10), ScriptedAnalyzer::default());
        scheduler.start().unwrap();

        for item in pending_items(4) {
            scheduler.enqueue(item);
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        wait_idle(&scheduler).await;

        let snapshots = repo.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status, AnalysisStatus::Success);

        scheduler.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_fails_in_flight_analysis_instead_of_waiting() {
        let (scheduler, repo, _) = scheduler(
            config(2, 10),
            ScriptedAnalyzer::default().with_delay(Duration::from_secs(3600)),
        );
        for item in pending_items(2) {
            scheduler.enqueue(item);
        }
        scheduler.tick().await;
        // Let the dispatch reach the LLM call.
        tokio::time::sleep(Duration::from_millis(10)).await;

        scheduler
            .stop(Duration::from_secs(5))
            .await
            .expect("cancellation lets the dispatch finish before the deadline");

        let snapshot = repo.snapshots().remove(0);
        assert_eq!(snapshot.status, AnalysisStatus::Failed);
        assert_eq!(snapshot.failure_reason.as_deref(), Some(CANCELLED_REASON));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_timeout_when_dispatch_hangs() {
        let (scheduler, repo, _) = scheduler(config(1, 10), ScriptedAnalyzer::default());
        repo.hang_create_snapshot.store(true, Ordering::SeqCst);
        scheduler.enqueue(pending_items(1).remove(0));

        assert!(matches!(
            scheduler.tick().await,
            TickOutcome::Dispatched { batch_size: 1, .. }
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = scheduler
            .stop(Duration::from_secs(1))
            .await
            .expect_err("a dispatch stuck outside the cancellable call outlives the deadline");
        match err {
            SchedulerError::ShutdownTimeout {
                deadline,
                outstanding,
            } => {
                assert_eq!(deadline, Duration::from_secs(1));
                assert_eq!(outstanding, 1);
            }
            other => panic!("expected a shutdown timeout, got {other:?}"),
        }
        assert!(!scheduler.status().running);
    }

    #[tokio::test]
    async fn test_stop_drops_handoffs_waiting_for_intake_room() {
        let mut cfg = config(100, 10);
        cfg.intake_capacity = 1;
        let (scheduler, _, _) = scheduler(cfg, ScriptedAnalyzer::default());

        // One item fills the channel; the other two wait in handoff tasks.
        for item in pending_items(3) {
            scheduler.enqueue(item);
        }
        assert_eq!(scheduler.status().queued_intake, 1);

        tokio::time::timeout(Duration::from_secs(5), scheduler.stop(Duration::from_secs(1)))
            .await
            .expect("waiting handoffs must not block shutdown")
            .expect("handoffs exit on cancellation");

        let status = scheduler.status();
        assert_eq!(status.pending, 0, "dropped, not folded into the backlog");
        assert_eq!(status.queued_intake, 0);
    }

    #[tokio::test]
    async fn test_panicking_dispatch_still_releases_slot_and_marks_clock() {
        let (scheduler, _, analyzer) =
            scheduler(config(2, 10), ScriptedAnalyzer::new(vec![Scripted::Panic]));
        for item in pending_items(2) {
            scheduler.enqueue(item);
        }

        scheduler.tick().await;
        tokio::time::timeout(Duration::from_secs(5), wait_idle(&scheduler))
            .await
            .expect("in-flight count must drop after a panic");

        assert_eq!(analyzer.call_count(), 1);
        assert!(
            scheduler.status().last_completed_at.is_some(),
            "a panicked attempt still advances the debounce clock"
        );
    }
}
