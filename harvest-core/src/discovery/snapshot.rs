use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::browser::BrowserResult;

use super::fingerprint::Fingerprint;

/// Extracted text per named field; `None` when the record lacks the field.
pub type FieldMap = BTreeMap<String, Option<String>>;

pub mod field {
    pub const TITLE: &str = "title";
    pub const PRICE: &str = "price";
    pub const DESCRIPTION: &str = "description";
    pub const RATING: &str = "rating";
    pub const REVIEW_COUNT: &str = "review_count";
    pub const STARS: &str = "stars";
    pub const URL: &str = "url";

    pub const ALL: [&str; 7] = [TITLE, PRICE, DESCRIPTION, RATING, REVIEW_COUNT, STARS, URL];
}

/// Reads the fields of one raw record. Must not fail: absent fields map to
/// `None`.
pub trait RecordExtractor<H> {
    fn extract_fields(&self, handle: &H) -> FieldMap;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotItem<H> {
    pub handle: H,
    pub fingerprint: Fingerprint,
}

impl<H> SnapshotItem<H> {
    pub fn new(handle: H, fingerprint: impl Into<Fingerprint>) -> Self {
        Self {
            handle,
            fingerprint: fingerprint.into(),
        }
    }
}

/// Lists the records currently visible on the surface. Calling it must not
/// change the page.
#[async_trait(?Send)]
pub trait SnapshotProvider {
    type Handle: Clone;

    async fn snapshot(&mut self) -> BrowserResult<Vec<SnapshotItem<Self::Handle>>>;
}

pub fn fingerprint_handles<H, E>(
    handles: Vec<H>,
    extractor: &E,
    description_prefix_chars: usize,
) -> Vec<SnapshotItem<H>>
where
    E: RecordExtractor<H> + ?Sized,
{
    handles
        .into_iter()
        .map(|handle| {
            let fields = extractor.extract_fields(&handle);
            let fingerprint = Fingerprint::from_fields(&fields, description_prefix_chars);
            SnapshotItem {
                handle,
                fingerprint,
            }
        })
        .collect()
}
