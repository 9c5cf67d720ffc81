use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use harvest_core::discovery::PageDriver;
use harvest_core::{
    category_plan, fingerprint_handles, AdvanceKind, AdvanceStrategy, BrowserAutomation,
    BrowserLauncher, BrowserMetrics, BrowserResult, CancellationFlag, CatalogRun, CategoryLink,
    ChromiumPage, DiscoveryConfig, DiscoveryLoop, DiscoveryResult, ExportError, ExportFormat,
    ExportReport, HarvestConfig, LaunchOverrides, PaginateStrategy, PriceSummary, ProductHandle,
    RecordFilter, RecordProcessor, ScrollRecovery, ScrollStrategy, SessionSummary,
};

use crate::{AppError, DisplayFallback, Result};

/// Runs discovery against a listing page (or every category reachable from
/// it) and exports the collected products.
#[derive(Args, Debug, Clone)]
pub struct DiscoverArgs {
    /// Listing page to open
    #[arg(short, long)]
    pub url: String,

    /// How the page reveals more products (defaults to discovery.mode)
    #[arg(short, long, value_parser = ["scroll", "paginate"], value_name = "MODE")]
    pub mode: Option<String>,

    /// Run one session per sidebar category and subcategory
    #[arg(long)]
    pub all_categories: bool,

    /// Hard ceiling on loop iterations
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Stall recoveries allowed before giving up
    #[arg(long)]
    pub max_stall_recoveries: Option<usize>,

    /// Directory for the exported file
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Export format (csv | json)
    #[arg(long, value_parser = ["csv", "json"], value_name = "FORMAT")]
    pub export: Option<String>,

    /// Keep products priced at or above this value
    #[arg(long)]
    pub min_price: Option<f64>,

    /// Keep products priced at or below this value
    #[arg(long)]
    pub max_price: Option<f64>,

    /// Keep products with at least this many stars
    #[arg(long)]
    pub min_stars: Option<u32>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Collect and report without writing an export file
    #[arg(long)]
    pub dry_run: bool,

    /// Do not export the records collected before a fatal error
    #[arg(long)]
    pub discard_partial: bool,
}

impl DiscoverArgs {
    pub fn filter(&self) -> RecordFilter {
        RecordFilter {
            min_price: self.min_price,
            max_price: self.max_price,
            min_stars: self.min_stars,
        }
    }

    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut HarvestConfig) -> Result<()> {
        if let Some(mode) = &self.mode {
            config.discovery.mode = mode
                .parse::<AdvanceKind>()
                .map_err(|err| AppError::InvalidArgument(err.to_string()))?;
        }
        if let Some(max) = self.max_iterations {
            if max == 0 {
                return Err(AppError::InvalidArgument(
                    "--max-iterations must be at least 1".to_string(),
                ));
            }
            config.discovery.max_iterations = max;
        }
        if let Some(max) = self.max_stall_recoveries {
            config.discovery.max_stall_recoveries = max;
        }
        if let Some(dir) = &self.output_dir {
            config.export.output_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(format) = &self.export {
            config.export.format = format
                .parse::<ExportFormat>()
                .map_err(AppError::InvalidArgument)?;
        }
        if self.headed {
            config.chromium.headless = false;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct DiscoverReport {
    pub url: String,
    pub sessions: Vec<SessionSummary>,
    /// Records dropped because an earlier session already produced them.
    pub cross_session_duplicates: usize,
    pub records: usize,
    pub kept: usize,
    pub prices: PriceSummary,
    pub export: Option<ExportReport>,
    pub browser: BrowserMetrics,
    pub dry_run: bool,
    /// Fatal error that cut the harvest short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl DiscoverReport {
    pub fn incomplete(&self) -> bool {
        self.aborted.is_some() || self.sessions.iter().any(|s| s.stats.incomplete)
    }
}

fn session_lines(session: &SessionSummary) -> Vec<String> {
    let stats = &session.stats;
    let reason = stats
        .reason
        .map(|reason| reason.to_string())
        .unwrap_or_else(|| "aborted".to_string());
    let mut lines = Vec::new();
    match &session.category {
        Some(category) => lines.push(format!(
            "Session {} ({}) [{}]",
            stats.session_id,
            stats.mode,
            category.label()
        )),
        None => lines.push(format!("Session {} ({})", stats.session_id, stats.mode)),
    }
    lines.push(format!(
        "  started: {}",
        stats
            .started_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S %z")
    ));
    lines.push(format!(
        "  iterations={} advances={} recoveries={} wait_timeouts={}",
        stats.iterations, stats.advances, stats.recoveries, stats.wait_timeouts
    ));
    lines.push(format!(
        "  items={} new={} duplicates_skipped={} final_position={}",
        stats.items_collected, session.new_items, stats.duplicates_skipped, stats.final_position
    ));
    lines.push(format!(
        "  stopped: {reason}{} after {} ms",
        if stats.incomplete {
            " (output may be incomplete)"
        } else {
            ""
        },
        stats.duration_ms
    ));
    lines
}

impl DisplayFallback for DiscoverReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Discovery of {}", self.url)];
        for session in &self.sessions {
            lines.extend(session_lines(session));
        }
        if self.sessions.len() > 1 {
            lines.push(format!(
                "sessions: {} ({} duplicates across sessions)",
                self.sessions.len(),
                self.cross_session_duplicates
            ));
        }
        if let Some(reason) = &self.aborted {
            lines.push(format!("aborted: {reason}"));
        }
        lines.push(format!(
            "records: {} processed, {} kept",
            self.records, self.kept
        ));
        if self.prices.count > 0 {
            lines.push(format!(
                "prices: min={:.2} max={:.2} avg={:.2} total={:.2}",
                self.prices.min, self.prices.max, self.prices.avg, self.prices.total
            ));
        }
        match (&self.export, self.dry_run) {
            (_, true) => lines.push("export: skipped (dry-run)".to_string()),
            (Some(export), false) => lines.push(format!(
                "export: {} records -> {}{}",
                export.records,
                export.path.display(),
                if self.aborted.is_some() {
                    " (partial)"
                } else {
                    ""
                }
            )),
            (None, false) => lines.push("export: nothing written".to_string()),
        }
        lines.join("\n")
    }
}

pub fn run(config: &HarvestConfig, args: &DiscoverArgs) -> Result<DiscoverReport> {
    let mut config = config.clone();
    args.apply_overrides(&mut config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute(config, args))
}

async fn execute(config: HarvestConfig, args: &DiscoverArgs) -> Result<DiscoverReport> {
    let cancel = CancellationFlag::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current iteration");
            signal.cancel();
        }
    });

    let config = Arc::new(config);
    let launcher = BrowserLauncher::new(Arc::clone(&config));
    let automation = launcher
        .launch_with_overrides(LaunchOverrides {
            headless: Some(config.chromium.headless),
        })
        .await?;

    let mut catalog = CatalogRun::new();
    let collected = collect(&automation, &config, args, &cancel, &mut catalog).await;
    let browser = automation.metrics();
    let shutdown = automation.shutdown().await;
    let aborted = match collected {
        Ok(()) => {
            shutdown?;
            None
        }
        Err(err) => {
            if let Err(shutdown_err) = shutdown {
                warn!(error = %shutdown_err, "browser shutdown failed after abort");
            }
            warn!(
                error = %err,
                collected = catalog.items().len(),
                "harvest aborted; keeping records collected so far"
            );
            Some(err.to_string())
        }
    };

    let cross_session_duplicates = catalog.duplicates_skipped();
    let (items, sessions) = catalog.into_parts();
    let processor = RecordProcessor::new();
    let records = processor.process_all(items.iter().map(|handle| &handle.fields));
    let processed = records.len();
    let records = args.filter().apply(records);
    let prices = PriceSummary::from_records(&records);

    let export = if args.dry_run || (aborted.is_some() && args.discard_partial) {
        None
    } else {
        let format = config.export.format;
        let path = config.export.output_path(format);
        match format.exporter().export(&records, &path) {
            Ok(report) => Some(report),
            Err(ExportError::NoRecords) => {
                warn!(url = %args.url, "no records to export");
                None
            }
            Err(err) => return Err(err.into()),
        }
    };

    let report = DiscoverReport {
        url: args.url.clone(),
        sessions,
        cross_session_duplicates,
        records: processed,
        kept: records.len(),
        prices,
        export,
        browser,
        dry_run: args.dry_run,
        aborted,
    };
    info!(
        sessions = report.sessions.len(),
        records = report.records,
        kept = report.kept,
        incomplete = report.incomplete(),
        "discover command finished"
    );
    Ok(report)
}

/// Runs every planned session on one tab, merging output into `catalog`.
/// Stops at the first fatal error; whatever was merged before it stays.
async fn collect(
    automation: &BrowserAutomation,
    config: &HarvestConfig,
    args: &DiscoverArgs,
    cancel: &CancellationFlag,
    catalog: &mut CatalogRun<ProductHandle>,
) -> BrowserResult<()> {
    let context = automation.new_context().await?;
    let mut page = ChromiumPage::new(
        context,
        &config.selectors,
        config.discovery.description_prefix_chars,
    )?;
    page.open(&args.url).await?;
    if !args.all_categories {
        return discover_into(&page, config, cancel, None, catalog).await;
    }

    let plan = category_plan(&mut page).await?;
    if plan.is_empty() {
        warn!(url = %args.url, "no categories found; harvesting the start page only");
        return discover_into(&page, config, cancel, None, catalog).await;
    }
    let total = plan.len();
    for (index, category) in plan.into_iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(remaining = total - index, "harvest cancelled before all categories ran");
            break;
        }
        info!(
            category = %category.label(),
            url = %category.url,
            position = index + 1,
            total,
            "starting category session"
        );
        page.open(&category.url).await?;
        discover_into(&page, config, cancel, Some(category), catalog).await?;
    }
    Ok(())
}

/// One discovery session on the listing currently open in `page`.
async fn discover_into(
    page: &ChromiumPage,
    config: &HarvestConfig,
    cancel: &CancellationFlag,
    category: Option<CategoryLink>,
    catalog: &mut CatalogRun<ProductHandle>,
) -> BrowserResult<()> {
    let wait = config.wait_policy();
    let session = match config.discovery.mode {
        AdvanceKind::Scroll => {
            let strategy = ScrollStrategy::new(page.clone(), wait)
                .with_recovery(ScrollRecovery::from(&config.scroll));
            run_loop(strategy, page.clone(), config.discovery_config(), cancel.clone()).await
        }
        AdvanceKind::Paginate => {
            let strategy =
                PaginateStrategy::new(page.clone(), wait).with_pagination(&config.pagination);
            run_loop(strategy, page.clone(), config.discovery_config(), cancel.clone()).await
        }
    };
    let prefix = config.discovery.description_prefix_chars;
    match session {
        Ok(outcome) => {
            let output = fingerprint_handles(outcome.items, page, prefix);
            catalog.absorb(category, outcome.stats, output);
            Ok(())
        }
        Err(err) => {
            let output = fingerprint_handles(err.partial, page, prefix);
            catalog.absorb(category, err.stats, output);
            Err(err.source)
        }
    }
}

async fn run_loop<A: AdvanceStrategy>(
    strategy: A,
    page: ChromiumPage,
    config: DiscoveryConfig,
    cancel: CancellationFlag,
) -> DiscoveryResult<ProductHandle> {
    DiscoveryLoop::new(strategy, page, config)
        .with_cancellation(cancel)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use harvest_core::load_harvest_config;

    use super::*;

    fn fixture() -> HarvestConfig {
        load_harvest_config(Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/harvest.toml"))
            .expect("fixture config")
    }

    fn args() -> DiscoverArgs {
        DiscoverArgs {
            url: "https://example.test/laptops".to_string(),
            mode: None,
            all_categories: false,
            max_iterations: None,
            max_stall_recoveries: None,
            output_dir: None,
            export: None,
            min_price: None,
            max_price: None,
            min_stars: None,
            headed: false,
            dry_run: false,
            discard_partial: false,
        }
    }

    fn session(name: &str, items: usize, new_items: usize) -> SessionSummary {
        let mut stats = harvest_core::DiscoveryStats::new(AdvanceKind::Paginate);
        stats.items_collected = items;
        stats.reason = Some(harvest_core::TerminationReason::Exhausted);
        SessionSummary {
            category: Some(CategoryLink::new(name, format!("https://example.test/{name}"))),
            stats,
            new_items,
        }
    }

    fn report(sessions: Vec<SessionSummary>, aborted: Option<String>) -> DiscoverReport {
        DiscoverReport {
            url: "https://example.test".to_string(),
            sessions,
            cross_session_duplicates: 2,
            records: 4,
            kept: 4,
            prices: PriceSummary::default(),
            export: Some(ExportReport {
                format: ExportFormat::Csv,
                path: PathBuf::from("/tmp/harvest-out/scraped_products.csv"),
                records: 4,
            }),
            browser: BrowserMetrics::default(),
            dry_run: false,
            aborted,
        }
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = fixture();
        let args = DiscoverArgs {
            mode: Some("paginate".into()),
            max_iterations: Some(9),
            max_stall_recoveries: Some(1),
            output_dir: Some(PathBuf::from("/tmp/harvest-out")),
            export: Some("json".into()),
            headed: true,
            ..args()
        };
        args.apply_overrides(&mut config).unwrap();
        assert_eq!(config.discovery.mode, AdvanceKind::Paginate);
        assert_eq!(config.discovery.max_iterations, 9);
        assert_eq!(config.discovery.max_stall_recoveries, 1);
        assert_eq!(config.export.format, ExportFormat::Json);
        assert!(!config.chromium.headless);
        assert_eq!(
            config.export.output_path(ExportFormat::Json),
            PathBuf::from("/tmp/harvest-out/scraped_products.json")
        );
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = fixture();
        let args = DiscoverArgs {
            max_iterations: Some(0),
            ..args()
        };
        assert!(matches!(
            args.apply_overrides(&mut config),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn filter_built_from_flags() {
        let args = DiscoverArgs {
            min_price: Some(100.0),
            min_stars: Some(3),
            ..args()
        };
        let filter = args.filter();
        assert_eq!(filter.min_price, Some(100.0));
        assert_eq!(filter.max_price, None);
        assert_eq!(filter.min_stars, Some(3));
    }

    #[test]
    fn report_lists_every_category_session() {
        let sessions = vec![session("laptops", 3, 3), session("tablets", 3, 1)];
        let text = report(sessions, None).display();
        assert!(text.contains("[laptops]"));
        assert!(text.contains("[tablets]"));
        assert!(text.contains("items=3 new=1"));
        assert!(text.contains("sessions: 2 (2 duplicates across sessions)"));
        assert!(!text.contains("aborted"));
    }

    #[test]
    fn aborted_report_marks_partial_export() {
        let mut first = session("laptops", 4, 4);
        first.stats.reason = None;
        first.stats.incomplete = true;
        let report = report(vec![first], Some("browser navigation failed".to_string()));
        assert!(report.incomplete());
        let text = report.display();
        assert!(text.contains("stopped: aborted (output may be incomplete)"));
        assert!(text.contains("aborted: browser navigation failed"));
        assert!(text.contains("(partial)"));
    }
}
