//! Package item model shared by every source.

use serde::{Deserialize, Serialize};

/// Display metadata for a package, as reported by its source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    /// Title (falls back to the id when a source has none)
    pub title: String,

    /// Short description
    pub description: String,

    /// Authors (comma-separated)
    pub authors: String,

    /// Total download count, if the source tracks it
    pub download_count: Option<u64>,

    /// Icon URL (fetching and decoding belongs to the UI)
    pub icon_url: Option<String>,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A single package version found by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageItem {
    /// Package id as reported by the source (case preserved)
    pub id: String,

    /// Version string
    pub version: String,

    /// Metadata for presentation
    pub metadata: DisplayMetadata,

    /// Identifier of the source that reported this copy
    pub source_id: String,
}

impl PackageItem {
    /// Create an item with empty metadata
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            metadata: DisplayMetadata {
                title: id.clone(),
                ..Default::default()
            },
            id,
            version: version.into(),
            source_id: source_id.into(),
        }
    }

    /// Attach display metadata
    pub fn with_metadata(mut self, metadata: DisplayMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Deduplication key for this item
    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.id, &self.version)
    }

    /// Whether the version carries a prerelease label
    pub fn is_prerelease(&self) -> bool {
        match semver::Version::parse(&self.version) {
            Ok(v) => !v.pre.is_empty(),
            // Four-part and other legacy versions: a hyphen still marks a label
            Err(_) => self.version.contains('-'),
        }
    }
}

/// Identity of a package version across sources: id compared
/// case-insensitively, version compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    id: String,
    version: String,
}

impl ItemKey {
    /// Build a key from an id and version
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_lowercase(),
            version: version.trim().to_string(),
        }
    }
}
