use std::path::{Path, PathBuf};

use serde::Serialize;

use harvest_core::{AdvanceKind, ExportFormat, HarvestConfig};

use crate::DisplayFallback;

#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub path: PathBuf,
    pub mode: AdvanceKind,
    pub max_iterations: usize,
    pub max_stall_recoveries: usize,
    pub no_progress_limit: usize,
    pub wait_timeout_ms: u64,
    pub product_container: String,
    pub end_markers: usize,
    pub user_agents: usize,
    pub headless: bool,
    pub export_format: ExportFormat,
    pub export_path: PathBuf,
}

impl ConfigSummary {
    pub fn new(path: &Path, config: &HarvestConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            mode: config.discovery.mode,
            max_iterations: config.discovery.max_iterations,
            max_stall_recoveries: config.discovery.max_stall_recoveries,
            no_progress_limit: config.discovery.no_progress_limit,
            wait_timeout_ms: config.wait.timeout_ms,
            product_container: config.selectors.product_container.clone(),
            end_markers: config.selectors.end_of_content.len(),
            user_agents: config.user_agents.pool.len(),
            headless: config.chromium.headless,
            export_format: config.export.format,
            export_path: config.export.output_path(config.export.format),
        }
    }
}

impl DisplayFallback for ConfigSummary {
    fn display(&self) -> String {
        [
            format!("Config: {} (ok)", self.path.display()),
            format!(
                "  mode={} max_iterations={} max_stall_recoveries={} no_progress_limit={}",
                self.mode, self.max_iterations, self.max_stall_recoveries, self.no_progress_limit
            ),
            format!("  wait timeout: {} ms", self.wait_timeout_ms),
            format!(
                "  products: {} ({} end markers)",
                self.product_container, self.end_markers
            ),
            format!(
                "  chromium: headless={} user_agents={}",
                self.headless, self.user_agents
            ),
            format!(
                "  export: {} -> {}",
                self.export_format,
                self.export_path.display()
            ),
        ]
        .join("\n")
    }
}
