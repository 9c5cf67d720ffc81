pub mod browser;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod records;

pub use browser::{
    BrowserAutomation, BrowserContext, BrowserError, BrowserLauncher, BrowserMetrics,
    BrowserResult, ChromiumPage, LaunchOverrides, ProductHandle,
};
pub use catalog::{category_plan, CatalogRun, CategoryLink, CategorySource, SessionSummary};
pub use config::{
    load_harvest_config, ChromiumSection, DiscoverySection, ExportSection, HarvestConfig,
    PaginationSection, ScrollSection, SelectorSection, UserAgentSection, ViewportSection,
    WaitSection,
};
pub use discovery::{
    fingerprint_handles, AdvanceKind, AdvanceResult, AdvanceStrategy, CancellationFlag,
    DiscoveryConfig, DiscoveryError, DiscoveryLoop, DiscoveryOutcome, DiscoveryResult,
    DiscoveryStats, Fingerprint, PageDriver, PaginateStrategy, PositionSignal, RecordExtractor,
    ScrollRecovery, ScrollStrategy, SnapshotItem, SnapshotProvider, StallDetector,
    TerminationReason, WaitPolicy,
};
pub use error::{ConfigError, Result};
pub use export::{
    CsvExporter, ExportError, ExportFormat, ExportReport, ExportResult, Exporter, JsonExporter,
};
pub use records::{price_value, PriceSummary, ProductRecord, RecordFilter, RecordProcessor};
