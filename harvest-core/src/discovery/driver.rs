use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::browser::{BrowserError, BrowserResult};

/// How a surface reveals more content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceKind {
    Scroll,
    Paginate,
}

impl fmt::Display for AdvanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AdvanceKind::Scroll => "scroll",
            AdvanceKind::Paginate => "paginate",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for AdvanceKind {
    type Err = BrowserError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "scroll" | "scrolling" => Ok(AdvanceKind::Scroll),
            "paginate" | "pagination" | "pages" => Ok(AdvanceKind::Paginate),
            other => Err(BrowserError::Configuration(format!(
                "invalid advance mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceAction {
    ScrollToBottom,
    /// Relative scroll in CSS pixels; negative values scroll up.
    ScrollBy(i64),
    NextPage,
}

/// Document height for scrolling surfaces, page index for paginated ones.
/// Only comparable with earlier values from the same surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct PositionSignal(pub u64);

impl fmt::Display for PositionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Browser-side operations the discovery engine relies on.
///
/// Impossible actions are reported as `Ok(false)`; `Err` is reserved for a
/// broken session.
#[async_trait(?Send)]
pub trait PageDriver {
    async fn open(&mut self, url: &str) -> BrowserResult<()>;
    async fn current_position(&mut self, kind: AdvanceKind) -> BrowserResult<PositionSignal>;
    async fn is_loading_indicator_visible(&mut self) -> BrowserResult<bool>;
    async fn is_end_marker_visible(&mut self) -> BrowserResult<bool>;
    async fn perform_advance_action(&mut self, action: AdvanceAction) -> BrowserResult<bool>;
}
