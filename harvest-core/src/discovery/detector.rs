use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use super::driver::PositionSignal;

pub const DEFAULT_NO_PROGRESS_LIMIT: usize = 3;

/// What one loop iteration observed after acting on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub position: PositionSignal,
    /// Position differs from the previous observation (or the session baseline).
    pub moved: bool,
    pub new_items: usize,
    /// Whether the advance action was possible at all.
    pub possible: bool,
}

impl Observation {
    pub fn made_progress(&self) -> bool {
        self.moved || self.new_items > 0
    }
}

/// Sliding window over the most recent observations.
#[derive(Debug, Clone)]
pub struct ObservationWindow {
    entries: VecDeque<Observation>,
    capacity: usize,
}

impl ObservationWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, observation: Observation) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(observation);
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.entries.back()
    }

    /// Newest first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &Observation> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StallSignal {
    /// Surface moved but produced nothing new.
    MovedWithoutItems,
    /// New items appeared while the position stayed put.
    ItemsWithoutMovement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The advance strategy reported there is nothing further.
    Exhausted,
    /// Neither position nor item count moved for the configured streak.
    NoProgress,
    /// Too many stall recoveries in one session.
    StallBudget,
    /// `max_iterations` reached.
    IterationBudget,
    Cancelled,
}

impl TerminationReason {
    /// Whether output collected under this reason may be missing items.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            TerminationReason::StallBudget
                | TerminationReason::IterationBudget
                | TerminationReason::Cancelled
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationReason::Exhausted => "exhausted",
            TerminationReason::NoProgress => "no_progress",
            TerminationReason::StallBudget => "stall_budget",
            TerminationReason::IterationBudget => "iteration_budget",
            TerminationReason::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stalled(StallSignal),
    Terminated(TerminationReason),
}

#[derive(Debug, Clone)]
pub struct StallDetector {
    no_progress_limit: usize,
}

impl Default for StallDetector {
    fn default() -> Self {
        Self::new(DEFAULT_NO_PROGRESS_LIMIT)
    }
}

impl StallDetector {
    pub fn new(no_progress_limit: usize) -> Self {
        Self {
            no_progress_limit: no_progress_limit.max(1),
        }
    }

    pub fn no_progress_limit(&self) -> usize {
        self.no_progress_limit
    }

    /// Window able to hold the streak this detector needs.
    pub fn window(&self, requested_capacity: usize) -> ObservationWindow {
        ObservationWindow::new(requested_capacity.max(self.no_progress_limit))
    }

    pub fn evaluate(&self, window: &ObservationWindow) -> Verdict {
        let Some(latest) = window.latest() else {
            return Verdict::Continue;
        };

        if !latest.possible {
            return Verdict::Terminated(TerminationReason::Exhausted);
        }

        let idle_streak = window
            .iter_recent()
            .take_while(|observation| !observation.made_progress())
            .count();
        if idle_streak >= self.no_progress_limit {
            return Verdict::Terminated(TerminationReason::NoProgress);
        }

        match (latest.moved, latest.new_items > 0) {
            (true, false) => Verdict::Stalled(StallSignal::MovedWithoutItems),
            (false, true) => Verdict::Stalled(StallSignal::ItemsWithoutMovement),
            _ => Verdict::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe(position: u64, moved: bool, new_items: usize) -> Observation {
        Observation {
            position: PositionSignal(position),
            moved,
            new_items,
            possible: true,
        }
    }

    #[test]
    fn empty_window_continues() {
        let detector = StallDetector::default();
        assert_eq!(detector.evaluate(&detector.window(4)), Verdict::Continue);
    }

    #[test]
    fn impossible_advance_terminates_immediately() {
        let detector = StallDetector::default();
        let mut window = detector.window(4);
        window.push(Observation {
            possible: false,
            ..observe(10, false, 0)
        });
        assert_eq!(
            detector.evaluate(&window),
            Verdict::Terminated(TerminationReason::Exhausted)
        );
    }

    #[test]
    fn moving_without_items_stalls_rather_than_terminates() {
        let detector = StallDetector::default();
        let mut window = detector.window(4);
        window.push(observe(1000, true, 0));
        assert_eq!(
            detector.evaluate(&window),
            Verdict::Stalled(StallSignal::MovedWithoutItems)
        );
        window.push(observe(2000, true, 0));
        assert_eq!(
            detector.evaluate(&window),
            Verdict::Stalled(StallSignal::MovedWithoutItems)
        );
    }

    #[test]
    fn items_without_movement_stall() {
        let detector = StallDetector::default();
        let mut window = detector.window(4);
        window.push(observe(1000, false, 6));
        assert_eq!(
            detector.evaluate(&window),
            Verdict::Stalled(StallSignal::ItemsWithoutMovement)
        );
    }

    #[test]
    fn sustained_dual_no_progress_terminates_on_third() {
        let detector = StallDetector::default();
        let mut window = detector.window(8);
        window.push(observe(3000, true, 12));
        assert_eq!(detector.evaluate(&window), Verdict::Continue);
        window.push(observe(3000, false, 0));
        assert_eq!(detector.evaluate(&window), Verdict::Continue);
        window.push(observe(3000, false, 0));
        assert_eq!(detector.evaluate(&window), Verdict::Continue);
        window.push(observe(3000, false, 0));
        assert_eq!(
            detector.evaluate(&window),
            Verdict::Terminated(TerminationReason::NoProgress)
        );
    }

    #[test]
    fn progress_breaks_idle_streak() {
        let detector = StallDetector::new(2);
        let mut window = detector.window(8);
        window.push(observe(100, false, 0));
        window.push(observe(200, true, 4));
        window.push(observe(200, false, 0));
        assert_eq!(detector.evaluate(&window), Verdict::Continue);
        window.push(observe(200, false, 0));
        assert_eq!(
            detector.evaluate(&window),
            Verdict::Terminated(TerminationReason::NoProgress)
        );
    }

    #[test]
    fn window_capacity_never_below_limit() {
        let detector = StallDetector::new(5);
        let window = detector.window(2);
        assert_eq!(window.capacity(), 5);
    }

    #[test]
    fn window_drops_oldest_entries() {
        let mut window = ObservationWindow::new(2);
        window.push(observe(1, true, 1));
        window.push(observe(2, true, 1));
        window.push(observe(3, true, 1));
        assert_eq!(window.len(), 2);
        let positions = window
            .iter_recent()
            .map(|o| o.position.0)
            .collect::<Vec<_>>();
        assert_eq!(positions, vec![3, 2]);
    }

    #[test]
    fn thresholds_are_tunable() {
        for limit in 1..=5 {
            let detector = StallDetector::new(limit);
            let mut window = detector.window(limit);
            for step in 1..=limit {
                window.push(observe(50, false, 0));
                let verdict = detector.evaluate(&window);
                if step < limit {
                    assert_eq!(verdict, Verdict::Continue);
                } else {
                    assert_eq!(verdict, Verdict::Terminated(TerminationReason::NoProgress));
                }
            }
        }
    }
}
