//! Search query model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Package search query
///
/// Queries compare by value: two queries with the same text, prerelease flag
/// and filters are the same query, and continuation tokens issued for one are
/// valid for the other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    /// Free-form search text (empty matches everything)
    pub search_text: String,

    /// Whether prerelease versions are included
    pub include_prerelease: bool,

    /// Source-specific filters, kept sorted so equal queries hash equally
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl Query {
    /// Create a new query for the given search text
    pub fn new(search_text: impl Into<String>) -> Self {
        Self {
            search_text: search_text.into(),
            ..Default::default()
        }
    }

    /// Include or exclude prerelease versions
    pub fn include_prerelease(mut self, include: bool) -> Self {
        self.include_prerelease = include;
        self
    }

    /// Add a filter
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Search text trimmed of surrounding whitespace
    pub fn trimmed_text(&self) -> &str {
        self.search_text.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_value_identity() {
        let a = Query::new("serilog").include_prerelease(true).filter("tfm", "net8.0");
        let b = Query::new("serilog").filter("tfm", "net8.0").include_prerelease(true);
        assert_eq!(a, b);

        let c = Query::new("serilog");
        assert_ne!(a, c);
    }

    #[test]
    fn test_trimmed_text() {
        assert_eq!(Query::new("  json  ").trimmed_text(), "json");
    }
}
