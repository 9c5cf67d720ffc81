use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::browser::BrowserResult;
use crate::config::{PaginationSection, ScrollSection, WaitSection};

use super::detector::Observation;
use super::driver::{AdvanceAction, AdvanceKind, PageDriver, PositionSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceResult {
    /// An action was actually performed on the page.
    pub attempted: bool,
    /// `false` is authoritative: the surface has nothing further to reveal.
    pub possible: bool,
    pub new_position: PositionSignal,
    /// The post-action wait hit its deadline without seeing progress.
    pub timed_out: bool,
}

impl AdvanceResult {
    pub fn refused(position: PositionSignal) -> Self {
        Self {
            attempted: false,
            possible: false,
            new_position: position,
            timed_out: false,
        }
    }

    pub fn performed(position: PositionSignal, outcome: WaitOutcome) -> Self {
        Self {
            attempted: true,
            possible: true,
            new_position: position,
            timed_out: outcome == WaitOutcome::TimedOut,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Moved,
    LoaderCleared,
    TimedOut,
}

/// Deadline and backoff for condition polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&WaitSection> for WaitPolicy {
    fn from(section: &WaitSection) -> Self {
        Self {
            timeout: section.timeout(),
            poll_interval: Duration::from_millis(section.poll_interval_ms),
            max_poll_interval: Duration::from_millis(section.max_poll_interval_ms),
        }
    }
}

impl WaitPolicy {
    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            timeout: self.timeout.saturating_mul(factor.max(1)),
            ..*self
        }
    }

    /// Short wait used between the increments of a smoothed scroll.
    pub fn step(&self) -> Self {
        Self {
            timeout: self.poll_interval.saturating_mul(4).min(self.timeout),
            ..*self
        }
    }

    pub fn poller(&self) -> Poller {
        Poller {
            deadline: Instant::now() + self.timeout,
            interval: self.poll_interval,
            max_interval: self.max_poll_interval.max(self.poll_interval),
        }
    }
}

#[derive(Debug)]
pub struct Poller {
    deadline: Instant,
    interval: Duration,
    max_interval: Duration,
}

impl Poller {
    /// Sleeps until the next poll. Returns `false` once the deadline has
    /// passed; never sleeps beyond it.
    pub async fn tick(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        let remaining = self.deadline - now;
        sleep(self.interval.min(remaining)).await;
        self.interval = self.interval.saturating_mul(2).min(self.max_interval);
        true
    }
}

/// Polls until the position leaves `before`, or a loading indicator that was
/// seen during this wait disappears, or the policy deadline passes.
pub async fn wait_for_progress<D>(
    driver: &mut D,
    kind: AdvanceKind,
    before: PositionSignal,
    policy: &WaitPolicy,
) -> BrowserResult<(PositionSignal, WaitOutcome)>
where
    D: PageDriver + ?Sized,
{
    let mut poller = policy.poller();
    let mut loader_seen = false;
    loop {
        let position = driver.current_position(kind).await?;
        if position != before {
            return Ok((position, WaitOutcome::Moved));
        }
        if driver.is_loading_indicator_visible().await? {
            loader_seen = true;
        } else if loader_seen {
            let position = driver.current_position(kind).await?;
            return Ok((position, WaitOutcome::LoaderCleared));
        }
        if !poller.tick().await {
            trace!(%kind, %position, "progress wait timed out");
            return Ok((position, WaitOutcome::TimedOut));
        }
    }
}

/// Polls until no loading indicator is visible.
pub async fn wait_for_loader_clear<D>(
    driver: &mut D,
    kind: AdvanceKind,
    policy: &WaitPolicy,
) -> BrowserResult<(PositionSignal, WaitOutcome)>
where
    D: PageDriver + ?Sized,
{
    let mut poller = policy.poller();
    loop {
        if !driver.is_loading_indicator_visible().await? {
            let position = driver.current_position(kind).await?;
            return Ok((position, WaitOutcome::LoaderCleared));
        }
        if !poller.tick().await {
            let position = driver.current_position(kind).await?;
            return Ok((position, WaitOutcome::TimedOut));
        }
    }
}

/// One way of making the surface reveal more content.
#[async_trait(?Send)]
pub trait AdvanceStrategy {
    fn kind(&self) -> AdvanceKind;

    async fn current_position(&mut self) -> BrowserResult<PositionSignal>;

    /// Brings the freshly opened surface into a state worth snapshotting.
    async fn prepare(&mut self) -> BrowserResult<()> {
        Ok(())
    }

    async fn advance(&mut self) -> BrowserResult<AdvanceResult>;

    /// Escalating recovery after an ambiguous observation. `attempt` starts
    /// at 1 and grows with every recovery in the session.
    async fn recover(&mut self, attempt: usize, last: &Observation)
        -> BrowserResult<AdvanceResult>;
}

#[derive(Debug, Clone, Copy)]
pub struct ScrollRecovery {
    pub steps: u32,
    pub step_px: i64,
}

impl Default for ScrollRecovery {
    fn default() -> Self {
        Self {
            steps: 4,
            step_px: 600,
        }
    }
}

impl From<&ScrollSection> for ScrollRecovery {
    fn from(section: &ScrollSection) -> Self {
        Self {
            steps: section.recovery_steps.max(1),
            step_px: section.recovery_step_px,
        }
    }
}

/// Infinite-scroll surfaces; the position is the document height.
#[derive(Debug)]
pub struct ScrollStrategy<D> {
    driver: D,
    wait: WaitPolicy,
    recovery: ScrollRecovery,
}

impl<D: PageDriver> ScrollStrategy<D> {
    pub fn new(driver: D, wait: WaitPolicy) -> Self {
        Self {
            driver,
            wait,
            recovery: ScrollRecovery::default(),
        }
    }

    pub fn with_recovery(mut self, recovery: ScrollRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }
}

#[async_trait(?Send)]
impl<D: PageDriver> AdvanceStrategy for ScrollStrategy<D> {
    fn kind(&self) -> AdvanceKind {
        AdvanceKind::Scroll
    }

    async fn current_position(&mut self) -> BrowserResult<PositionSignal> {
        self.driver.current_position(AdvanceKind::Scroll).await
    }

    async fn advance(&mut self) -> BrowserResult<AdvanceResult> {
        let before = self.driver.current_position(AdvanceKind::Scroll).await?;
        if self.driver.is_end_marker_visible().await? {
            debug!(height = %before, "end-of-content marker visible");
            return Ok(AdvanceResult::refused(before));
        }
        if !self
            .driver
            .perform_advance_action(AdvanceAction::ScrollToBottom)
            .await?
        {
            return Ok(AdvanceResult::refused(before));
        }
        let (position, outcome) =
            wait_for_progress(&mut self.driver, AdvanceKind::Scroll, before, &self.wait).await?;
        trace!(before = %before, after = %position, ?outcome, "scrolled to bottom");
        Ok(AdvanceResult::performed(position, outcome))
    }

    async fn recover(
        &mut self,
        attempt: usize,
        _last: &Observation,
    ) -> BrowserResult<AdvanceResult> {
        let attempt = attempt.max(1) as u32;
        let before = self.driver.current_position(AdvanceKind::Scroll).await?;
        if self.driver.is_end_marker_visible().await? {
            return Ok(AdvanceResult::refused(before));
        }

        // Back off a little so the lazy loader's sentinel leaves the viewport.
        if !self
            .driver
            .perform_advance_action(AdvanceAction::ScrollBy(-self.recovery.step_px))
            .await?
        {
            return Ok(AdvanceResult::refused(before));
        }

        let steps = self.recovery.steps.saturating_mul(attempt);
        let step_wait = self.wait.step();
        let mut current = before;
        for _ in 0..steps {
            if !self
                .driver
                .perform_advance_action(AdvanceAction::ScrollBy(self.recovery.step_px))
                .await?
            {
                break;
            }
            let (position, _) =
                wait_for_progress(&mut self.driver, AdvanceKind::Scroll, current, &step_wait)
                    .await?;
            current = position;
        }

        if !self
            .driver
            .perform_advance_action(AdvanceAction::ScrollToBottom)
            .await?
        {
            return Ok(AdvanceResult::refused(current));
        }
        let policy = self.wait.scaled(attempt + 1);
        let (position, outcome) =
            wait_for_progress(&mut self.driver, AdvanceKind::Scroll, current, &policy).await?;
        debug!(
            attempt,
            steps,
            before = %before,
            after = %position,
            ?outcome,
            "smoothed scroll recovery"
        );
        Ok(AdvanceResult::performed(position, outcome))
    }
}

/// Paginated surfaces; the position is the active page index.
#[derive(Debug)]
pub struct PaginateStrategy<D> {
    driver: D,
    wait: WaitPolicy,
    max_reclicks: u32,
}

impl<D: PageDriver> PaginateStrategy<D> {
    pub fn new(driver: D, wait: WaitPolicy) -> Self {
        Self {
            driver,
            wait,
            max_reclicks: 2,
        }
    }

    pub fn with_pagination(mut self, section: &PaginationSection) -> Self {
        self.max_reclicks = section.max_reclicks.max(1);
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Scrolls the current page to the bottom so lazily rendered cards load,
    /// then waits for the loading indicator to clear.
    async fn settle_page(
        &mut self,
        policy: &WaitPolicy,
    ) -> BrowserResult<(PositionSignal, WaitOutcome)> {
        if !self
            .driver
            .perform_advance_action(AdvanceAction::ScrollToBottom)
            .await?
        {
            trace!("page has nothing to scroll");
        }
        wait_for_loader_clear(&mut self.driver, AdvanceKind::Paginate, policy).await
    }
}

#[async_trait(?Send)]
impl<D: PageDriver> AdvanceStrategy for PaginateStrategy<D> {
    fn kind(&self) -> AdvanceKind {
        AdvanceKind::Paginate
    }

    async fn current_position(&mut self) -> BrowserResult<PositionSignal> {
        self.driver.current_position(AdvanceKind::Paginate).await
    }

    async fn prepare(&mut self) -> BrowserResult<()> {
        let step = self.wait.step();
        self.settle_page(&step).await?;
        Ok(())
    }

    async fn advance(&mut self) -> BrowserResult<AdvanceResult> {
        let before = self.driver.current_position(AdvanceKind::Paginate).await?;
        if !self
            .driver
            .perform_advance_action(AdvanceAction::NextPage)
            .await?
        {
            debug!(page = %before, "next-page control absent or disabled");
            return Ok(AdvanceResult::refused(before));
        }
        let (position, outcome) =
            wait_for_progress(&mut self.driver, AdvanceKind::Paginate, before, &self.wait)
                .await?;
        let position = match outcome {
            WaitOutcome::TimedOut => position,
            _ => self.settle_page(&self.wait.step()).await?.0,
        };
        trace!(before = %before, after = %position, ?outcome, "clicked next page");
        Ok(AdvanceResult::performed(position, outcome))
    }

    async fn recover(
        &mut self,
        attempt: usize,
        last: &Observation,
    ) -> BrowserResult<AdvanceResult> {
        let attempt = attempt.max(1) as u32;
        let policy = self.wait.scaled(attempt);

        if last.made_progress() {
            // The previous click already served a page: either its cards are
            // late or the page index is stale. Clicking again would skip a
            // page that was never snapshotted.
            let (position, outcome) = self.settle_page(&policy).await?;
            debug!(attempt, page = %position, ?outcome, "waited for page to settle");
            return Ok(AdvanceResult::performed(position, outcome));
        }

        let before = self.driver.current_position(AdvanceKind::Paginate).await?;
        for click in 1..=self.max_reclicks {
            if !self
                .driver
                .perform_advance_action(AdvanceAction::NextPage)
                .await?
            {
                return Ok(AdvanceResult::refused(before));
            }
            let (_, outcome) =
                wait_for_progress(&mut self.driver, AdvanceKind::Paginate, before, &policy)
                    .await?;
            // Any page activity ends the re-clicks so the loop snapshots it
            // before another click.
            if outcome != WaitOutcome::TimedOut {
                let step = self.wait.step();
                let (position, _) = self.settle_page(&step).await?;
                debug!(attempt, click, page = %position, "re-click reached a page");
                return Ok(AdvanceResult::performed(position, outcome));
            }
        }
        debug!(attempt, page = %before, "re-clicks did not change the page");
        Ok(AdvanceResult::performed(before, WaitOutcome::TimedOut))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Effect {
        Refuse,
        Ignore,
        MoveTo { position: u64, after_reads: u32 },
    }

    /// Page stand-in whose position lands a few reads after an action.
    struct MockDriver {
        position: u64,
        pending: Option<(u64, u32)>,
        effects: VecDeque<Effect>,
        end_marker: bool,
        loader_reads: u32,
        actions: Vec<AdvanceAction>,
    }

    impl MockDriver {
        fn at(position: u64) -> Self {
            Self {
                position,
                pending: None,
                effects: VecDeque::new(),
                end_marker: false,
                loader_reads: 0,
                actions: Vec::new(),
            }
        }

        fn with_effects(mut self, effects: Vec<Effect>) -> Self {
            self.effects = effects.into();
            self
        }
    }

    #[async_trait(?Send)]
    impl PageDriver for MockDriver {
        async fn open(&mut self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }

        async fn current_position(&mut self, _kind: AdvanceKind) -> BrowserResult<PositionSignal> {
            if let Some((target, remaining)) = self.pending {
                if remaining == 0 {
                    self.position = target;
                    self.pending = None;
                } else {
                    self.pending = Some((target, remaining - 1));
                }
            }
            Ok(PositionSignal(self.position))
        }

        async fn is_loading_indicator_visible(&mut self) -> BrowserResult<bool> {
            if self.loader_reads > 0 {
                self.loader_reads -= 1;
                return Ok(true);
            }
            Ok(false)
        }

        async fn is_end_marker_visible(&mut self) -> BrowserResult<bool> {
            Ok(self.end_marker)
        }

        async fn perform_advance_action(&mut self, action: AdvanceAction) -> BrowserResult<bool> {
            self.actions.push(action);
            match self.effects.pop_front().unwrap_or(Effect::Ignore) {
                Effect::Refuse => Ok(false),
                Effect::Ignore => Ok(true),
                Effect::MoveTo {
                    position,
                    after_reads,
                } => {
                    self.pending = Some((position, after_reads));
                    Ok(true)
                }
            }
        }
    }

    fn policy() -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_millis(400),
        }
    }

    fn observation(moved: bool) -> Observation {
        Observation {
            position: PositionSignal(2),
            moved,
            new_items: 0,
            possible: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_advance_waits_for_height_change() {
        let driver = MockDriver::at(1000).with_effects(vec![Effect::MoveTo {
            position: 2000,
            after_reads: 3,
        }]);
        let mut strategy = ScrollStrategy::new(driver, policy());

        let result = strategy.advance().await.unwrap();
        assert!(result.attempted && result.possible);
        assert!(!result.timed_out);
        assert_eq!(result.new_position, PositionSignal(2000));
        assert_eq!(strategy.driver().actions, vec![AdvanceAction::ScrollToBottom]);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_end_marker_refuses_without_acting() {
        let mut driver = MockDriver::at(1000);
        driver.end_marker = true;
        let mut strategy = ScrollStrategy::new(driver, policy());

        let result = strategy.advance().await.unwrap();
        assert!(!result.attempted);
        assert!(!result.possible);
        assert!(strategy.driver().actions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_bounded_by_deadline() {
        let driver = MockDriver::at(1000).with_effects(vec![Effect::Ignore]);
        let mut strategy = ScrollStrategy::new(driver, policy());

        let started = Instant::now();
        let result = strategy.advance().await.unwrap();
        let elapsed = started.elapsed();
        assert!(result.possible);
        assert!(result.timed_out);
        assert_eq!(result.new_position, PositionSignal(1000));
        assert!(elapsed >= policy().timeout);
        assert!(elapsed <= policy().timeout + policy().max_poll_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_loader_ends_wait_early() {
        let mut driver = MockDriver::at(1000).with_effects(vec![Effect::Ignore]);
        driver.loader_reads = 2;
        let mut strategy = ScrollStrategy::new(driver, policy());

        let started = Instant::now();
        let result = strategy.advance().await.unwrap();
        assert!(!result.timed_out);
        assert!(started.elapsed() < policy().timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_recovery_escalates_with_attempt() {
        let driver = MockDriver::at(1000);
        let mut strategy = ScrollStrategy::new(driver, policy()).with_recovery(ScrollRecovery {
            steps: 4,
            step_px: 600,
        });

        strategy.recover(1, &observation(true)).await.unwrap();
        let first = strategy.driver().actions.len();
        strategy.recover(2, &observation(true)).await.unwrap();
        let second = strategy.driver().actions.len() - first;

        // nudge + steps + final scroll to bottom
        assert_eq!(first, 1 + 4 + 1);
        assert_eq!(second, 1 + 8 + 1);
        assert_eq!(strategy.driver().actions[0], AdvanceAction::ScrollBy(-600));
        assert_eq!(
            strategy.driver().actions[first - 1],
            AdvanceAction::ScrollToBottom
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_recovery_refused_final_jump_is_reported() {
        // Nudge and four steps succeed, the final scroll to bottom is refused.
        let driver = MockDriver::at(1000).with_effects(vec![
            Effect::Ignore,
            Effect::Ignore,
            Effect::Ignore,
            Effect::Ignore,
            Effect::Ignore,
            Effect::Refuse,
        ]);
        let mut strategy = ScrollStrategy::new(driver, policy());

        let result = strategy.recover(1, &observation(true)).await.unwrap();
        assert!(!result.attempted);
        assert!(!result.possible);
        assert_eq!(result.new_position, PositionSignal(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn paginate_refused_when_next_control_missing() {
        let driver = MockDriver::at(5).with_effects(vec![Effect::Refuse]);
        let mut strategy = PaginateStrategy::new(driver, policy());

        let result = strategy.advance().await.unwrap();
        assert!(!result.possible);
        assert_eq!(result.new_position, PositionSignal(5));
    }

    #[tokio::test(start_paused = true)]
    async fn paginate_advance_reports_new_index() {
        let driver = MockDriver::at(1).with_effects(vec![Effect::MoveTo {
            position: 2,
            after_reads: 1,
        }]);
        let mut strategy = PaginateStrategy::new(driver, policy());

        let result = strategy.advance().await.unwrap();
        assert_eq!(result.new_position, PositionSignal(2));
        // The new page is scrolled so lazy cards render before the snapshot.
        assert_eq!(
            strategy.driver().actions,
            vec![AdvanceAction::NextPage, AdvanceAction::ScrollToBottom]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn paginate_prepare_scrolls_first_page() {
        let mut strategy = PaginateStrategy::new(MockDriver::at(1), policy());

        strategy.prepare().await.unwrap();
        assert_eq!(strategy.driver().actions, vec![AdvanceAction::ScrollToBottom]);
    }

    #[tokio::test(start_paused = true)]
    async fn paginate_recovery_reclicks_until_page_changes() {
        let driver = MockDriver::at(2).with_effects(vec![
            Effect::Ignore,
            Effect::MoveTo {
                position: 3,
                after_reads: 0,
            },
        ]);
        let mut strategy = PaginateStrategy::new(driver, policy())
            .with_pagination(&PaginationSection { max_reclicks: 2 });

        let result = strategy.recover(1, &observation(false)).await.unwrap();
        assert_eq!(result.new_position, PositionSignal(3));
        assert_eq!(
            strategy.driver().actions,
            vec![
                AdvanceAction::NextPage,
                AdvanceAction::NextPage,
                AdvanceAction::ScrollToBottom
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn paginate_recovery_stops_reclicking_once_a_page_loads() {
        // The index never changes, but the loader shows the click served a page.
        let mut driver = MockDriver::at(1).with_effects(vec![Effect::Ignore]);
        driver.loader_reads = 1;
        let mut strategy = PaginateStrategy::new(driver, policy())
            .with_pagination(&PaginationSection { max_reclicks: 3 });

        let result = strategy.recover(1, &observation(false)).await.unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.new_position, PositionSignal(1));
        assert_eq!(
            strategy.driver().actions,
            vec![AdvanceAction::NextPage, AdvanceAction::ScrollToBottom]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn paginate_recovery_with_stale_index_never_clicks() {
        // New cards arrived while the active-page index stayed put.
        let mut strategy = PaginateStrategy::new(MockDriver::at(1), policy());
        let last = Observation {
            position: PositionSignal(1),
            moved: false,
            new_items: 3,
            possible: true,
        };

        let result = strategy.recover(1, &last).await.unwrap();
        assert!(result.possible);
        assert!(!strategy
            .driver()
            .actions
            .contains(&AdvanceAction::NextPage));
    }

    #[tokio::test(start_paused = true)]
    async fn paginate_recovery_after_move_only_settles() {
        let mut driver = MockDriver::at(2);
        driver.loader_reads = 1;
        let mut strategy = PaginateStrategy::new(driver, policy());

        let result = strategy.recover(1, &observation(true)).await.unwrap();
        assert!(result.possible);
        assert!(!result.timed_out);
        assert_eq!(strategy.driver().actions, vec![AdvanceAction::ScrollToBottom]);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_backs_off_up_to_cap() {
        let policy = WaitPolicy {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_millis(300),
        };
        let mut poller = policy.poller();
        let started = Instant::now();
        let mut ticks = 0;
        while poller.tick().await {
            ticks += 1;
        }
        // 100 + 200 + 300 + 300 + remaining 100
        assert_eq!(ticks, 5);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_millis(1100));
    }

    #[test]
    fn wait_policy_from_section() {
        let section = WaitSection {
            timeout_ms: 2500,
            poll_interval_ms: 50,
            max_poll_interval_ms: 800,
        };
        let policy = WaitPolicy::from(&section);
        assert_eq!(policy.timeout, Duration::from_millis(2500));
        assert_eq!(policy.scaled(3).timeout, Duration::from_millis(7500));
        assert_eq!(policy.step().timeout, Duration::from_millis(200));
    }
}
