use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::discovery::{field, FieldMap};

/// Product record after post-processing, as written by the exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub title: String,
    pub price: String,
    pub price_value: f64,
    pub description: String,
    pub rating: String,
    pub review_count: u32,
    pub stars: u32,
    pub url: String,
}

impl ProductRecord {
    pub const COLUMNS: [&'static str; 8] = [
        "title",
        "price",
        "price_value",
        "description",
        "rating",
        "review_count",
        "stars",
        "url",
    ];

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.title.clone(),
            self.price.clone(),
            self.price_value.to_string(),
            self.description.clone(),
            self.rating.clone(),
            self.review_count.to_string(),
            self.stars.to_string(),
            self.url.clone(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct RecordProcessor {
    review_regex: Regex,
    leading_int: Regex,
}

impl Default for RecordProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordProcessor {
    pub fn new() -> Self {
        let review_regex = Regex::new(r"(?i)(\d+)\s*reviews?").expect("valid regex");
        let leading_int = Regex::new(r"^\s*(\d+)").expect("valid regex");
        Self {
            review_regex,
            leading_int,
        }
    }

    /// Returns `None` for records without a title.
    pub fn process(&self, fields: &FieldMap) -> Option<ProductRecord> {
        let title = text(fields, field::TITLE);
        if title.is_empty() {
            warn!(url = %text(fields, field::URL), "record missing required title");
            return None;
        }
        let price = text(fields, field::PRICE);
        let rating = text(fields, field::RATING);
        let review_source = match text(fields, field::REVIEW_COUNT) {
            value if value.is_empty() => rating.clone(),
            value => value,
        };

        Some(ProductRecord {
            price_value: price_value(&price),
            review_count: self.review_count(&review_source),
            stars: self.leading_integer(&text(fields, field::STARS)),
            title,
            price,
            description: text(fields, field::DESCRIPTION),
            rating,
            url: text(fields, field::URL),
        })
    }

    pub fn process_all<'a, I>(&self, records: I) -> Vec<ProductRecord>
    where
        I: IntoIterator<Item = &'a FieldMap>,
    {
        let mut seen = 0usize;
        let processed = records
            .into_iter()
            .inspect(|_| seen += 1)
            .filter_map(|fields| self.process(fields))
            .collect::<Vec<_>>();
        info!(
            received = seen,
            processed = processed.len(),
            "records processed"
        );
        processed
    }

    pub fn review_count(&self, value: &str) -> u32 {
        if let Some(count) = self
            .review_regex
            .captures(value)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            return count;
        }
        self.leading_integer(value)
    }

    fn leading_integer(&self, value: &str) -> u32 {
        self.leading_int
            .captures(value)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    }
}

/// Numeric price with everything but digits and `.` stripped; `0.0` when
/// nothing numeric remains.
pub fn price_value(price: &str) -> f64 {
    let numeric = price
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect::<String>();
    numeric.parse().unwrap_or(0.0)
}

fn text(fields: &FieldMap, name: &str) -> String {
    fields
        .get(name)
        .and_then(|value| value.as_deref())
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_stars: Option<u32>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.min_price.is_none() && self.max_price.is_none() && self.min_stars.is_none()
    }

    pub fn matches(&self, record: &ProductRecord) -> bool {
        self.min_price.map_or(true, |min| record.price_value >= min)
            && self.max_price.map_or(true, |max| record.price_value <= max)
            && self.min_stars.map_or(true, |min| record.stars >= min)
    }

    pub fn apply(&self, records: Vec<ProductRecord>) -> Vec<ProductRecord> {
        if self.is_empty() {
            return records;
        }
        let before = records.len();
        let kept = records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect::<Vec<_>>();
        info!(before, after = kept.len(), "records filtered");
        kept
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub total: f64,
}

impl PriceSummary {
    pub fn from_records(records: &[ProductRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut total = 0.0;
        for record in records {
            min = min.min(record.price_value);
            max = max.max(record.price_value);
            total += record.price_value;
        }
        Self {
            count: records.len(),
            min,
            max,
            avg: total / records.len() as f64,
            total,
        }
    }
}
