mod automation;
mod error;
mod metrics;
mod page;

pub use automation::{
    BrowserAutomation, BrowserContext, BrowserLauncher, LaunchOverrides, ViewportSpec,
};
pub use error::{BrowserError, BrowserResult};
pub use metrics::BrowserMetrics;
pub use page::{ChromiumPage, ProductHandle};
