use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{BrowserError, BrowserResult};
use crate::config::DiscoverySection;

use super::accumulator::Accumulator;
use super::advance::{AdvanceResult, AdvanceStrategy};
use super::detector::{
    Observation, ObservationWindow, StallDetector, TerminationReason, Verdict,
    DEFAULT_NO_PROGRESS_LIMIT,
};
use super::driver::{AdvanceKind, PositionSignal};
use super::snapshot::SnapshotProvider;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub max_iterations: usize,
    pub max_stall_recoveries: usize,
    pub no_progress_limit: usize,
    pub observation_window: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_stall_recoveries: 6,
            no_progress_limit: DEFAULT_NO_PROGRESS_LIMIT,
            observation_window: 8,
        }
    }
}

impl From<&DiscoverySection> for DiscoveryConfig {
    fn from(section: &DiscoverySection) -> Self {
        Self {
            max_iterations: section.max_iterations,
            max_stall_recoveries: section.max_stall_recoveries,
            no_progress_limit: section.no_progress_limit,
            observation_window: section.observation_window,
        }
    }
}

/// Shared stop request, checked once per iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Classifies the observation window after every iteration.
pub trait ProgressEvaluator {
    fn evaluate(&self, window: &ObservationWindow) -> Verdict;
}

impl ProgressEvaluator for StallDetector {
    fn evaluate(&self, window: &ObservationWindow) -> Verdict {
        StallDetector::evaluate(self, window)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryStats {
    pub session_id: Uuid,
    pub mode: AdvanceKind,
    pub started_at: DateTime<Utc>,
    pub iterations: usize,
    pub advances: usize,
    pub recoveries: usize,
    pub wait_timeouts: usize,
    pub initial_items: usize,
    pub items_collected: usize,
    pub duplicates_skipped: usize,
    pub final_position: PositionSignal,
    pub reason: Option<TerminationReason>,
    pub incomplete: bool,
    pub duration_ms: u64,
}

impl DiscoveryStats {
    pub fn new(mode: AdvanceKind) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
            iterations: 0,
            advances: 0,
            recoveries: 0,
            wait_timeouts: 0,
            initial_items: 0,
            items_collected: 0,
            duplicates_skipped: 0,
            final_position: PositionSignal::default(),
            reason: None,
            incomplete: false,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOutcome<H> {
    /// Unique records in first-accepted order.
    pub items: Vec<H>,
    pub reason: TerminationReason,
    /// Set when the session stopped on a budget or cancellation, so the
    /// output may be missing records.
    pub incomplete: bool,
    pub stats: DiscoveryStats,
}

/// A fatal collaborator failure, with the output accepted before it.
#[derive(Debug, Error)]
#[error("discovery aborted after {} items: {source}", .partial.len())]
pub struct DiscoveryError<H> {
    #[source]
    pub source: BrowserError,
    /// Unique records accepted before the failure, in first-accepted order.
    pub partial: Vec<H>,
    pub stats: DiscoveryStats,
}

pub type DiscoveryResult<H> = std::result::Result<DiscoveryOutcome<H>, DiscoveryError<H>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Advance,
    Recover,
}

/// Drives advance, snapshot, accumulate, evaluate until a termination
/// verdict or a budget is hit. Single-threaded and cooperative.
pub struct DiscoveryLoop<A, P, E = StallDetector> {
    strategy: A,
    provider: P,
    evaluator: E,
    config: DiscoveryConfig,
    cancel: CancellationFlag,
}

impl<A, P> DiscoveryLoop<A, P, StallDetector>
where
    A: AdvanceStrategy,
    P: SnapshotProvider,
{
    pub fn new(strategy: A, provider: P, config: DiscoveryConfig) -> Self {
        let evaluator = StallDetector::new(config.no_progress_limit);
        Self {
            strategy,
            provider,
            evaluator,
            config,
            cancel: CancellationFlag::new(),
        }
    }
}

impl<A, P, E> DiscoveryLoop<A, P, E>
where
    A: AdvanceStrategy,
    P: SnapshotProvider,
    E: ProgressEvaluator,
{
    pub fn with_evaluator<E2: ProgressEvaluator>(self, evaluator: E2) -> DiscoveryLoop<A, P, E2> {
        DiscoveryLoop {
            strategy: self.strategy,
            provider: self.provider,
            evaluator,
            config: self.config,
            cancel: self.cancel,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn strategy(&self) -> &A {
        &self.strategy
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn into_parts(self) -> (A, P) {
        (self.strategy, self.provider)
    }

    /// Runs one session. A fatal browser error ends the session with a
    /// [`DiscoveryError`] that still carries everything accepted before it.
    pub async fn run(&mut self) -> DiscoveryResult<P::Handle> {
        let start = Instant::now();
        let mut session = Session::new(self.strategy.kind(), &self.config);

        let reason = match self.drive(&mut session).await {
            Ok(reason) => reason,
            Err(source) => {
                let stats = session.finish(None, start);
                warn!(
                    session_id = %stats.session_id,
                    error = %source,
                    items = stats.items_collected,
                    iterations = stats.iterations,
                    "discovery session aborted"
                );
                return Err(DiscoveryError {
                    source,
                    partial: session.items,
                    stats,
                });
            }
        };

        let stats = session.finish(Some(reason), start);
        info!(
            session_id = %stats.session_id,
            reason = %reason,
            items = stats.items_collected,
            iterations = stats.iterations,
            recoveries = stats.recoveries,
            incomplete = stats.incomplete,
            duration_ms = stats.duration_ms,
            "discovery session finished"
        );

        Ok(DiscoveryOutcome {
            items: session.items,
            reason,
            incomplete: stats.incomplete,
            stats,
        })
    }

    async fn drive(&mut self, session: &mut Session<P::Handle>) -> BrowserResult<TerminationReason> {
        self.strategy.prepare().await?;
        session.last_position = self.strategy.current_position().await?;
        let initial = session.accumulator.accept(self.provider.snapshot().await?);
        session.stats.initial_items = initial.len();
        session.items.extend(initial);
        info!(
            session_id = %session.stats.session_id,
            mode = %session.stats.mode,
            position = %session.last_position,
            initial_items = session.stats.initial_items,
            "discovery session started"
        );

        let mut next = Step::Advance;
        let mut stall_recoveries = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                info!(iterations = session.stats.iterations, "discovery cancelled");
                return Ok(TerminationReason::Cancelled);
            }
            if session.stats.iterations >= self.config.max_iterations {
                warn!(
                    max_iterations = self.config.max_iterations,
                    items = session.items.len(),
                    "iteration budget exhausted; output may be incomplete"
                );
                return Ok(TerminationReason::IterationBudget);
            }
            session.stats.iterations += 1;

            let result = match (next, session.window.latest().copied()) {
                (Step::Recover, Some(last)) => {
                    session.stats.recoveries += 1;
                    self.strategy.recover(stall_recoveries, &last).await?
                }
                _ => {
                    session.stats.advances += 1;
                    self.strategy.advance().await?
                }
            };
            if result.timed_out {
                session.stats.wait_timeouts += 1;
            }

            let new_items = self.collect_new(&result, session).await?;
            let observation = Observation {
                position: result.new_position,
                moved: result.new_position != session.last_position,
                new_items,
                possible: result.possible,
            };
            session.last_position = result.new_position;
            session.window.push(observation);

            let verdict = self.evaluator.evaluate(&session.window);
            debug!(
                iteration = session.stats.iterations,
                position = %observation.position,
                moved = observation.moved,
                new_items,
                total = session.items.len(),
                ?verdict,
                "discovery iteration"
            );

            match verdict {
                Verdict::Continue => next = Step::Advance,
                Verdict::Stalled(signal) => {
                    stall_recoveries += 1;
                    if stall_recoveries > self.config.max_stall_recoveries {
                        warn!(
                            recoveries = stall_recoveries - 1,
                            ?signal,
                            "stall recovery budget exhausted; output may be incomplete"
                        );
                        return Ok(TerminationReason::StallBudget);
                    }
                    debug!(attempt = stall_recoveries, ?signal, "escalating recovery");
                    next = Step::Recover;
                }
                Verdict::Terminated(reason) => return Ok(reason),
            }
        }
    }

    async fn collect_new(
        &mut self,
        result: &AdvanceResult,
        session: &mut Session<P::Handle>,
    ) -> BrowserResult<usize> {
        if !result.possible {
            return Ok(0);
        }
        let accepted = session.accumulator.accept(self.provider.snapshot().await?);
        let count = accepted.len();
        session.items.extend(accepted);
        Ok(count)
    }
}

/// Per-session state; dropped when the session ends.
struct Session<H> {
    stats: DiscoveryStats,
    accumulator: Accumulator<H>,
    window: ObservationWindow,
    items: Vec<H>,
    last_position: PositionSignal,
}

impl<H> Session<H> {
    fn new(mode: AdvanceKind, config: &DiscoveryConfig) -> Self {
        Self {
            stats: DiscoveryStats::new(mode),
            accumulator: Accumulator::new(),
            window: ObservationWindow::new(
                config.observation_window.max(config.no_progress_limit),
            ),
            items: Vec::new(),
            last_position: PositionSignal::default(),
        }
    }

    /// `None` means the session was aborted by an error.
    fn finish(&mut self, reason: Option<TerminationReason>, start: Instant) -> DiscoveryStats {
        self.stats.items_collected = self.items.len();
        self.stats.duplicates_skipped = self.accumulator.duplicates_skipped();
        self.stats.final_position = self.last_position;
        self.stats.reason = reason;
        self.stats.incomplete = reason.map_or(true, |reason| reason.is_incomplete());
        self.stats.duration_ms = start.elapsed().as_millis() as u64;
        self.stats.clone()
    }
}
