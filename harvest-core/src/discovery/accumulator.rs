use std::collections::HashSet;

use tracing::trace;

use super::fingerprint::Fingerprint;
use super::snapshot::SnapshotItem;

/// Fingerprints accepted during one session. Grows only.
#[derive(Debug, Default)]
pub struct SeenSet {
    fingerprints: HashSet<Fingerprint>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the fingerprint was not seen before.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> bool {
        self.fingerprints.insert(fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// Filters raw snapshots down to records not accepted earlier in the session.
#[derive(Debug)]
pub struct Accumulator<H> {
    seen: SeenSet,
    duplicates: usize,
    _handle: std::marker::PhantomData<fn() -> H>,
}

impl<H> Default for Accumulator<H> {
    fn default() -> Self {
        Self {
            seen: SeenSet::new(),
            duplicates: 0,
            _handle: std::marker::PhantomData,
        }
    }
}

impl<H> Accumulator<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the net-new handles in snapshot order and records their
    /// fingerprints. Repeats inside the same snapshot are dropped as well.
    pub fn accept(&mut self, snapshot: Vec<SnapshotItem<H>>) -> Vec<H> {
        let mut accepted = Vec::new();
        for item in snapshot {
            if self.seen.insert(item.fingerprint) {
                accepted.push(item.handle);
            } else {
                self.duplicates += 1;
            }
        }
        trace!(
            accepted = accepted.len(),
            seen = self.seen.len(),
            "snapshot accumulated"
        );
        accepted
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn duplicates_skipped(&self) -> usize {
        self.duplicates
    }
}
