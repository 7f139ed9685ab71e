//! Local folder source: a directory of `.nupkg` files.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::models::{ContinuationToken, PackageItem, Query, ResultPage};
use crate::sources::{run_cancellable, SourceError, SourceSearchClient};

const DEFAULT_PAGE_SIZE: usize = 25;
const PACKAGE_EXTENSION: &str = ".nupkg";

/// Package source backed by a flat folder of `<id>.<version>.nupkg` files
///
/// The folder is listed on every page request, matches are sorted by id and
/// version, and the cursor is the offset of the next page.
#[derive(Debug, Clone)]
pub struct LocalFolderSource {
    id: String,
    root: PathBuf,
    page_size: usize,
}

impl LocalFolderSource {
    /// Create a new local folder source
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the number of results per page
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Folder this source reads from
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn list_matches(&self, query: &Query) -> Result<Vec<PackageItem>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            SourceError::Io(format!("Cannot read {}: {}", self.root.display(), e))
        })?;

        let needle = query.trimmed_text().to_lowercase();
        let mut items = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some((id, version)) = parse_package_file_name(name) else {
                continue;
            };
            if !needle.is_empty() && !id.to_lowercase().contains(&needle) {
                continue;
            }

            let item = PackageItem::new(id, version, &self.id);
            if !query.include_prerelease && item.is_prerelease() {
                continue;
            }
            items.push(item);
        }

        items.sort_by(|a, b| {
            a.id.to_lowercase()
                .cmp(&b.id.to_lowercase())
                .then_with(|| compare_versions(&a.version, &b.version))
        });
        Ok(items)
    }
}

#[async_trait]
impl SourceSearchClient for LocalFolderSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_page(
        &self,
        query: &Query,
        token: Option<&ContinuationToken>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage, SourceError> {
        let offset = match ContinuationToken::validated(token, query, &self.id) {
            Some(t) => t
                .cursor()
                .parse::<usize>()
                .map_err(|_| SourceError::InvalidRequest(format!("Bad cursor: {}", t.cursor())))?,
            None => 0,
        };

        let page_end = offset.checked_add(self.page_size).ok_or_else(|| {
            SourceError::InvalidRequest(format!("Cursor {} is out of range", offset))
        })?;

        let matches = run_cancellable(cancel, self.list_matches(query)).await?;
        let end = page_end.min(matches.len());
        let items = matches.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();

        let next_token = (end < matches.len())
            .then(|| ContinuationToken::new(&self.id, query, end.to_string()));

        Ok(ResultPage::new(&self.id, items, next_token))
    }
}

/// Split `<id>.<version>.nupkg` into id and version.
///
/// The version starts at the first dot-separated segment that begins with a
/// digit and, together with the rest of the name, forms a valid version.
fn parse_package_file_name(file_name: &str) -> Option<(String, String)> {
    let lower = file_name.to_lowercase();
    if !lower.ends_with(PACKAGE_EXTENSION) || lower.ends_with(".symbols.nupkg") {
        return None;
    }
    let stem = &file_name[..file_name.len() - PACKAGE_EXTENSION.len()];
    let segments: Vec<&str> = stem.split('.').collect();

    (1..segments.len()).find_map(|i| {
        let version = segments[i..].join(".");
        let starts_numeric = segments[i].chars().next().is_some_and(|c| c.is_ascii_digit());
        (starts_numeric && is_version(&version)).then(|| (segments[..i].join("."), version))
    })
}

/// Order versions by SemVer precedence.
///
/// Legacy versions that do not parse as SemVer compare by their numeric
/// release parts, then as text.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => release_parts(a)
            .cmp(&release_parts(b))
            .then_with(|| a.cmp(b)),
    }
}

fn release_parts(version: &str) -> Vec<u64> {
    version
        .split(['-', '+'])
        .next()
        .unwrap_or_default()
        .split('.')
        .map(|p| p.parse().unwrap_or(0))
        .collect()
}

/// Accepts SemVer 2.0 and legacy four-part versions.
fn is_version(text: &str) -> bool {
    if semver::Version::parse(text).is_ok() {
        return true;
    }
    let release = text.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<&str> = release.split('.').collect();
    (2..=4).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_package_file_name() {
        assert_eq!(
            parse_package_file_name("Newtonsoft.Json.13.0.3.nupkg"),
            Some(("Newtonsoft.Json".to_string(), "13.0.3".to_string()))
        );
        assert_eq!(
            parse_package_file_name("serilog.2.9.1-dev-01154.nupkg"),
            Some(("serilog".to_string(), "2.9.1-dev-01154".to_string()))
        );
        assert_eq!(
            parse_package_file_name("AWSSDK.Core.3.3.104.11.nupkg"),
            Some(("AWSSDK.Core".to_string(), "3.3.104.11".to_string()))
        );
        assert_eq!(
            parse_package_file_name("Contoso.2D.Engine.1.0.0.NUPKG"),
            Some(("Contoso.2D.Engine".to_string(), "1.0.0".to_string()))
        );
        assert_eq!(parse_package_file_name("readme.txt"), None);
        assert_eq!(parse_package_file_name("Foo.1.0.0.symbols.nupkg"), None);
        assert_eq!(parse_package_file_name("NoVersion.nupkg"), None);
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("9.0.0", "10.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("3.3.104.11", "3.3.104.2"), Ordering::Greater);
        assert_eq!(compare_versions("2.0.0.0", "10.0.0"), Ordering::Less);
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    #[tokio::test]
    async fn test_local_paging_and_filters() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Polly.8.0.0.nupkg");
        touch(dir.path(), "Polly.Extensions.8.0.0.nupkg");
        touch(dir.path(), "polly.core.8.1.0-beta.1.nupkg");
        touch(dir.path(), "Serilog.3.1.1.nupkg");
        touch(dir.path(), "notes.txt");

        let source = LocalFolderSource::new("local", dir.path()).page_size(1);
        let query = Query::new("POLLY");
        let cancel = CancellationToken::new();

        let first = source.fetch_page(&query, None, &cancel).await.unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.items[0].id, "Polly");
        assert_eq!(first.items[0].source_id, "local");

        let second = source
            .fetch_page(&query, first.next_token.as_ref(), &cancel)
            .await
            .unwrap();
        assert_eq!(second.items[0].id, "Polly.Extensions");
        assert!(second.is_last());

        let with_pre = Query::new("polly").include_prerelease(true);
        let mut ids = Vec::new();
        let mut token = None;
        loop {
            let page = source
                .fetch_page(&with_pre, token.as_ref(), &cancel)
                .await
                .unwrap();
            ids.extend(page.items.into_iter().map(|i| i.id));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(ids, vec!["Polly", "polly.core", "Polly.Extensions"]);
    }

    #[tokio::test]
    async fn test_local_versions_in_precedence_order() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Moq.10.0.0.nupkg");
        touch(dir.path(), "Moq.9.0.0.nupkg");
        touch(dir.path(), "Moq.9.0.0.1.nupkg");

        let source = LocalFolderSource::new("local", dir.path());
        let page = source
            .fetch_page(&Query::new("moq"), None, &CancellationToken::new())
            .await
            .unwrap();
        let versions: Vec<_> = page.items.iter().map(|i| i.version.as_str()).collect();
        assert_eq!(versions, vec!["9.0.0", "9.0.0.1", "10.0.0"]);
    }

    #[tokio::test]
    async fn test_local_cursor_out_of_range() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Polly.8.0.0.nupkg");

        let source = LocalFolderSource::new("local", dir.path());
        let query = Query::new("polly");
        let token = ContinuationToken::new("local", &query, usize::MAX.to_string());
        let result = source
            .fetch_page(&query, Some(&token), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(SourceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_local_missing_folder() {
        let source = LocalFolderSource::new("local", "/nonexistent/packages");
        let result = source
            .fetch_page(&Query::new(""), None, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
