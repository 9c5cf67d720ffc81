use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::browser::BrowserResult;
use crate::discovery::{Accumulator, DiscoveryStats, SnapshotItem};

/// A sidebar entry that leads to its own product listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLink {
    pub name: String,
    pub url: String,
    /// Top-level category a subcategory belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl CategoryLink {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            parent: None,
        }
    }

    pub fn under(mut self, parent: &CategoryLink) -> Self {
        self.parent = Some(parent.name.clone());
        self
    }

    pub fn label(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{parent} / {}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Reads category navigation from the site being harvested.
#[async_trait(?Send)]
pub trait CategorySource {
    /// Top-level categories of the page currently open.
    async fn categories(&mut self) -> BrowserResult<Vec<CategoryLink>>;

    /// Subcategories listed once `parent` is open. May navigate.
    async fn subcategories(&mut self, parent: &CategoryLink) -> BrowserResult<Vec<CategoryLink>>;
}

/// Every category followed by its subcategories, each URL once.
pub async fn category_plan<S>(source: &mut S) -> BrowserResult<Vec<CategoryLink>>
where
    S: CategorySource + ?Sized,
{
    let categories = source.categories().await?;
    let mut urls = HashSet::new();
    let mut plan = Vec::new();
    for category in categories {
        if !urls.insert(category.url.clone()) {
            continue;
        }
        let subcategories = source.subcategories(&category).await?;
        debug!(
            category = %category.name,
            subcategories = subcategories.len(),
            "category expanded"
        );
        plan.push(category);
        plan.extend(
            subcategories
                .into_iter()
                .filter(|sub| urls.insert(sub.url.clone())),
        );
    }
    info!(entries = plan.len(), "category plan built");
    Ok(plan)
}

/// How one discovery session contributed to a multi-session harvest.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub category: Option<CategoryLink>,
    pub stats: DiscoveryStats,
    /// Records no earlier session had produced.
    pub new_items: usize,
}

/// Merges the output of consecutive discovery sessions. Each session keeps
/// its own seen-set; this accumulator only spans the harvest, so a product
/// listed under several categories is kept once, at its first appearance.
#[derive(Debug)]
pub struct CatalogRun<H> {
    accumulator: Accumulator<H>,
    items: Vec<H>,
    sessions: Vec<SessionSummary>,
}

impl<H> Default for CatalogRun<H> {
    fn default() -> Self {
        Self {
            accumulator: Accumulator::new(),
            items: Vec::new(),
            sessions: Vec::new(),
        }
    }
}

impl<H> CatalogRun<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one session's fingerprinted output; returns how many records
    /// were new to the harvest.
    pub fn absorb(
        &mut self,
        category: Option<CategoryLink>,
        stats: DiscoveryStats,
        output: Vec<SnapshotItem<H>>,
    ) -> usize {
        let accepted = self.accumulator.accept(output);
        let new_items = accepted.len();
        self.items.extend(accepted);
        let label = category
            .as_ref()
            .map(CategoryLink::label)
            .unwrap_or_else(|| "-".to_string());
        info!(
            category = %label,
            session_items = stats.items_collected,
            new_items,
            total = self.items.len(),
            "session merged"
        );
        self.sessions.push(SessionSummary {
            category,
            stats,
            new_items,
        });
        new_items
    }

    pub fn items(&self) -> &[H] {
        &self.items
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    /// Records dropped because an earlier session already produced them.
    pub fn duplicates_skipped(&self) -> usize {
        self.accumulator.duplicates_skipped()
    }

    pub fn into_parts(self) -> (Vec<H>, Vec<SessionSummary>) {
        (self.items, self.sessions)
    }
}
