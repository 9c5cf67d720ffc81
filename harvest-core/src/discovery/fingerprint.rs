use std::fmt;

use serde::Serialize;

use super::snapshot::{field, FieldMap};

pub const FINGERPRINT_DELIMITER: char = '|';
pub const DEFAULT_DESCRIPTION_PREFIX: usize = 50;

/// Identity key of one record within a discovery session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Builds `title|price|description-prefix`. Absent fields contribute an
    /// empty segment so a sparse record still gets a usable key.
    pub fn from_fields(fields: &FieldMap, description_prefix_chars: usize) -> Self {
        let title = normalize(lookup(fields, field::TITLE));
        let price = normalize(lookup(fields, field::PRICE));
        let description = normalize(lookup(fields, field::DESCRIPTION));
        let description = description
            .chars()
            .take(description_prefix_chars)
            .collect::<String>();
        Self::from_parts(&[&title, &price, description.trim_end()])
    }

    pub fn from_parts(parts: &[&str]) -> Self {
        let mut key = String::new();
        for (idx, part) in parts.iter().enumerate() {
            if idx > 0 {
                key.push(FINGERPRINT_DELIMITER);
            }
            key.push_str(part);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when every segment is empty, i.e. nothing identifying was found.
    pub fn is_blank(&self) -> bool {
        self.0.chars().all(|c| c == FINGERPRINT_DELIMITER)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

fn lookup<'a>(fields: &'a FieldMap, name: &str) -> &'a str {
    fields
        .get(name)
        .and_then(|value| value.as_deref())
        .unwrap_or("")
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: Option<&str>, price: Option<&str>, description: Option<&str>) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(field::TITLE.into(), title.map(str::to_string));
        map.insert(field::PRICE.into(), price.map(str::to_string));
        map.insert(field::DESCRIPTION.into(), description.map(str::to_string));
        map
    }

    #[test]
    fn whitespace_jitter_yields_same_key() {
        let a = Fingerprint::from_fields(
            &fields(Some("Asus VivoBook"), Some("$295.99"), Some("Asus, 15.6\" HD")),
            50,
        );
        let b = Fingerprint::from_fields(
            &fields(
                Some("  Asus   VivoBook\n"),
                Some("$295.99 "),
                Some("Asus,\t15.6\"  HD"),
            ),
            50,
        );
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "Asus VivoBook|$295.99|Asus, 15.6\" HD");
    }

    #[test]
    fn description_is_truncated_on_char_boundary() {
        let long = "é".repeat(80);
        let key = Fingerprint::from_fields(&fields(Some("t"), Some("p"), Some(&long)), 50);
        let description = key.as_str().rsplit(FINGERPRINT_DELIMITER).next().unwrap();
        assert_eq!(description.chars().count(), 50);
    }

    #[test]
    fn missing_fields_degrade_to_empty_segments() {
        let key = Fingerprint::from_fields(&fields(Some("Lenovo"), None, None), 50);
        assert_eq!(key.as_str(), "Lenovo||");
        assert!(!key.is_blank());
        let empty = Fingerprint::from_fields(&FieldMap::new(), 50);
        assert!(empty.is_blank());
    }

    #[test]
    fn different_prices_diverge() {
        let a = Fingerprint::from_fields(&fields(Some("Galaxy"), Some("$100"), None), 50);
        let b = Fingerprint::from_fields(&fields(Some("Galaxy"), Some("$120"), None), 50);
        assert_ne!(a, b);
    }
}
