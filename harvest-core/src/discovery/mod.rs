mod accumulator;
mod advance;
mod detector;
mod driver;
mod engine;
mod fingerprint;
mod snapshot;

pub use accumulator::{Accumulator, SeenSet};
pub use advance::{
    wait_for_loader_clear, wait_for_progress, AdvanceResult, AdvanceStrategy, PaginateStrategy,
    Poller, ScrollRecovery, ScrollStrategy, WaitOutcome, WaitPolicy,
};
pub use detector::{
    Observation, ObservationWindow, StallDetector, StallSignal, TerminationReason, Verdict,
    DEFAULT_NO_PROGRESS_LIMIT,
};
pub use driver::{AdvanceAction, AdvanceKind, PageDriver, PositionSignal};
pub use engine::{
    CancellationFlag, DiscoveryConfig, DiscoveryError, DiscoveryLoop, DiscoveryOutcome,
    DiscoveryResult, DiscoveryStats, ProgressEvaluator,
};
pub use fingerprint::{Fingerprint, DEFAULT_DESCRIPTION_PREFIX, FINGERPRINT_DELIMITER};
pub use snapshot::{
    field, fingerprint_handles, FieldMap, RecordExtractor, SnapshotItem, SnapshotProvider,
};
