use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::discovery::{AdvanceKind, DiscoveryConfig, WaitPolicy};
use crate::error::{ConfigError, Result};
use crate::export::ExportFormat;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarvestConfig {
    pub chromium: ChromiumSection,
    pub viewport: ViewportSection,
    pub user_agents: UserAgentSection,
    pub selectors: SelectorSection,
    pub discovery: DiscoverySection,
    pub wait: WaitSection,
    pub scroll: ScrollSection,
    pub pagination: PaginationSection,
    pub export: ExportSection,
}

impl HarvestConfig {
    /// Rejects combinations the discovery loop cannot make progress with.
    pub fn validate(&self) -> Result<()> {
        if self.discovery.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "discovery.max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.discovery.no_progress_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "discovery.no_progress_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.wait.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "wait.poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.wait.max_poll_interval_ms < self.wait.poll_interval_ms {
            return Err(ConfigError::Invalid {
                field: "wait.max_poll_interval_ms",
                reason: format!(
                    "{} is below poll_interval_ms {}",
                    self.wait.max_poll_interval_ms, self.wait.poll_interval_ms
                ),
            });
        }
        if self.selectors.product_container.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "selectors.product_container",
                reason: "selector is empty".to_string(),
            });
        }
        if self.viewport.resolutions.is_empty() {
            return Err(ConfigError::Invalid {
                field: "viewport.resolutions",
                reason: "at least one resolution is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig::from(&self.discovery)
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::from(&self.wait)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub tab_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportSection {
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
    pub device_scale_factor: [f32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSection {
    pub product_container: String,
    pub title: String,
    pub price: String,
    pub description: String,
    pub rating: String,
    pub review_count: String,
    pub stars: String,
    pub loading_indicator: String,
    pub end_of_content: Vec<String>,
    pub pagination_container: String,
    pub next_page_label: String,
    pub active_page: String,
    #[serde(default = "default_category_link")]
    pub category_link: String,
    /// Resolved against the sidebar after a category has been opened.
    #[serde(default = "default_subcategory_link")]
    pub subcategory_link: String,
}

fn default_category_link() -> String {
    ".sidebar-nav > li > a".to_string()
}

fn default_subcategory_link() -> String {
    ".sidebar-nav li.active ul li a".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    pub mode: AdvanceKind,
    pub max_iterations: usize,
    pub max_stall_recoveries: usize,
    pub no_progress_limit: usize,
    pub observation_window: usize,
    pub description_prefix_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitSection {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
}

impl WaitSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrollSection {
    pub recovery_steps: u32,
    pub recovery_step_px: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationSection {
    pub max_reclicks: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSection {
    pub output_dir: String,
    pub file_stem: String,
    pub format: ExportFormat,
}

impl ExportSection {
    pub fn output_path(&self, format: ExportFormat) -> PathBuf {
        Path::new(&self.output_dir).join(format!("{}.{}", self.file_stem, format.extension()))
    }
}

pub fn load_harvest_config<P: AsRef<Path>>(path: P) -> Result<HarvestConfig> {
    let config: HarvestConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
