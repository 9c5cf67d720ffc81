use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserMetrics {
    pub pages_opened: u64,
    pub advance_actions: u64,
    pub refused_actions: u64,
    pub snapshots_taken: u64,
    pub items_seen: u64,
}

impl BrowserMetrics {
    pub fn record_page_open(&mut self) {
        self.pages_opened = self.pages_opened.saturating_add(1);
    }

    pub fn record_advance(&mut self, performed: bool) {
        if performed {
            self.advance_actions = self.advance_actions.saturating_add(1);
        } else {
            self.refused_actions = self.refused_actions.saturating_add(1);
        }
    }

    pub fn record_snapshot(&mut self, items: usize) {
        self.snapshots_taken = self.snapshots_taken.saturating_add(1);
        self.items_seen = self.items_seen.saturating_add(items as u64);
    }

    pub fn average_items_per_snapshot(&self) -> f64 {
        if self.snapshots_taken == 0 {
            0.0
        } else {
            self.items_seen as f64 / self.snapshots_taken as f64
        }
    }
}
