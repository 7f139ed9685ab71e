//! NuGet V3 search source implementation.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::models::{ContinuationToken, DisplayMetadata, PackageItem, Query, ResultPage};
use crate::sources::{run_cancellable, SourceError, SourceSearchClient};
use crate::utils::HttpClient;

/// Service index of nuget.org
pub const NUGET_ORG_INDEX: &str = "https://api.nuget.org/v3/index.json";

const SEARCH_RESOURCE_TYPE: &str = "SearchQueryService";
const DEFAULT_PAGE_SIZE: usize = 25;

/// NuGet V3 search source
///
/// The endpoint is either a service index (`.../index.json`), in which case
/// the `SearchQueryService` resource is resolved on first use, or the search
/// URL itself. Paging uses `skip`/`take`; the continuation cursor is the next
/// `skip` value.
#[derive(Debug)]
pub struct NuGetSearchSource {
    id: String,
    endpoint: String,
    page_size: usize,
    http: HttpClient,
    search_url: OnceCell<String>,
}

impl NuGetSearchSource {
    /// Create a new NuGet source
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>, http: HttpClient) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            page_size: DEFAULT_PAGE_SIZE,
            http,
            search_url: OnceCell::new(),
        }
    }

    /// Create a source for nuget.org
    pub fn nuget_org(http: HttpClient) -> Self {
        Self::new("nuget.org", NUGET_ORG_INDEX, http)
    }

    /// Set the number of results requested per page
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Resolve the search endpoint, reading the service index at most once
    async fn search_url(&self) -> Result<&str, SourceError> {
        self.search_url
            .get_or_try_init(|| async {
                if !self.endpoint.ends_with("index.json") {
                    return Ok(self.endpoint.clone());
                }

                tracing::debug!(source = %self.id, "Resolving search service from {}", self.endpoint);
                let index: ServiceIndex = self.http.get_json(&self.endpoint).await?;
                index
                    .resources
                    .into_iter()
                    .find(|r| r.kind.starts_with(SEARCH_RESOURCE_TYPE))
                    .map(|r| r.id)
                    .ok_or_else(|| {
                        SourceError::NotFound(format!(
                            "{} has no {} resource",
                            self.endpoint, SEARCH_RESOURCE_TYPE
                        ))
                    })
            })
            .await
            .map(|s| s.as_str())
    }

    /// Build the request URL for one page
    fn build_url(&self, base: &str, query: &Query, skip: usize) -> Result<Url, SourceError> {
        let mut url = Url::parse(base)
            .map_err(|e| SourceError::InvalidRequest(format!("Bad search URL {}: {}", base, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", query.trimmed_text())
                .append_pair("skip", &skip.to_string())
                .append_pair("take", &self.page_size.to_string())
                .append_pair("prerelease", if query.include_prerelease { "true" } else { "false" })
                .append_pair("semVerLevel", "2.0.0");
            for (key, value) in &query.filters {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn parse_entry(&self, entry: SearchEntry) -> PackageItem {
        let title = entry
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| entry.id.clone());

        PackageItem::new(entry.id, entry.version, &self.id).with_metadata(DisplayMetadata {
            title,
            description: entry.description.unwrap_or_default(),
            authors: entry.authors.join(),
            download_count: entry.total_downloads,
            icon_url: entry.icon_url.filter(|u| !u.is_empty()),
            tags: entry.tags.unwrap_or_default(),
        })
    }

    async fn fetch(&self, query: &Query, skip: usize) -> Result<ResultPage, SourceError> {
        let base = self.search_url().await?;
        let url = self.build_url(base, query, skip)?;

        let response: SearchResponseJson = self.http.get_json(url.as_str()).await?;
        let fetched = response.data.len();
        let items: Vec<PackageItem> = response
            .data
            .into_iter()
            .map(|entry| self.parse_entry(entry))
            .collect();

        let next_skip = skip.checked_add(fetched).ok_or_else(|| {
            SourceError::InvalidRequest(format!("Cursor {} is out of range", skip))
        })?;
        let next_token = (fetched > 0 && (next_skip as u64) < response.total_hits)
            .then(|| ContinuationToken::new(&self.id, query, next_skip.to_string()));

        tracing::debug!(
            source = %self.id,
            skip,
            fetched,
            total = response.total_hits,
            "NuGet search page"
        );

        Ok(ResultPage::new(&self.id, items, next_token))
    }
}

#[async_trait]
impl SourceSearchClient for NuGetSearchSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_page(
        &self,
        query: &Query,
        token: Option<&ContinuationToken>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage, SourceError> {
        let skip = match ContinuationToken::validated(token, query, &self.id) {
            Some(t) => t
                .cursor()
                .parse::<usize>()
                .map_err(|_| SourceError::InvalidRequest(format!("Bad cursor: {}", t.cursor())))?,
            None => 0,
        };

        run_cancellable(cancel, self.fetch(query, skip)).await
    }
}

#[derive(Debug, Deserialize)]
struct ServiceIndex {
    #[serde(default)]
    resources: Vec<ServiceResource>,
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponseJson {
    #[serde(rename = "totalHits", default)]
    total_hits: u64,
    #[serde(default)]
    data: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchEntry {
    id: String,
    version: String,
    title: Option<String>,
    description: Option<String>,
    #[serde(default)]
    authors: Authors,
    total_downloads: Option<u64>,
    icon_url: Option<String>,
    tags: Option<Vec<String>>,
}

/// Feeds report authors either as one string or as a list
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Authors {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl Authors {
    fn join(self) -> String {
        match self {
            Authors::None => String::new(),
            Authors::One(s) => s,
            Authors::Many(v) => v.join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_ONE: &str = r#"{
        "totalHits": 3,
        "data": [
            {"id": "Serilog", "version": "3.1.1", "description": "Structured logging",
             "authors": ["Serilog Contributors"], "totalDownloads": 1000,
             "iconUrl": "https://example.test/serilog.png", "tags": ["logging"]},
            {"id": "Serilog.Sinks.Console", "version": "5.0.1", "authors": "Serilog Contributors"}
        ]
    }"#;

    const PAGE_TWO: &str = r#"{
        "totalHits": 3,
        "data": [ {"id": "Serilog.Extensions.Logging", "version": "8.0.0", "title": ""} ]
    }"#;

    fn source_for(server: &mockito::Server) -> NuGetSearchSource {
        NuGetSearchSource::new(
            "test-feed",
            format!("{}/query", server.url()),
            HttpClient::new().unwrap(),
        )
        .page_size(2)
    }

    #[tokio::test]
    async fn test_nuget_paging() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/query")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("q".into(), "serilog".into()),
                mockito::Matcher::UrlEncoded("skip".into(), "0".into()),
                mockito::Matcher::UrlEncoded("take".into(), "2".into()),
                mockito::Matcher::UrlEncoded("prerelease".into(), "false".into()),
            ]))
            .with_body(PAGE_ONE)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/query")
            .match_query(mockito::Matcher::UrlEncoded("skip".into(), "2".into()))
            .with_body(PAGE_TWO)
            .create_async()
            .await;

        let source = source_for(&server);
        let query = Query::new("serilog");
        let cancel = CancellationToken::new();

        let page = source.fetch_page(&query, None, &cancel).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].metadata.authors, "Serilog Contributors");
        assert_eq!(page.items[0].metadata.download_count, Some(1000));
        assert_eq!(page.items[1].metadata.title, "Serilog.Sinks.Console");
        assert_eq!(page.items[1].source_id, "test-feed");
        assert!(!page.is_last());

        let page = source
            .fetch_page(&query, page.next_token.as_ref(), &cancel)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].metadata.title, "Serilog.Extensions.Logging");
        assert!(page.is_last());

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_nuget_resolves_service_index() {
        let mut server = mockito::Server::new_async().await;
        let index = format!(
            r#"{{"version": "3.0.0", "resources": [
                {{"@id": "{0}/registration", "@type": "RegistrationsBaseUrl"}},
                {{"@id": "{0}/search", "@type": "SearchQueryService/3.5.0"}}
            ]}}"#,
            server.url()
        );
        let index_mock = server
            .mock("GET", "/v3/index.json")
            .with_body(index)
            .expect(1)
            .create_async()
            .await;
        let search = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"totalHits": 0, "data": []}"#)
            .expect(2)
            .create_async()
            .await;

        let source = NuGetSearchSource::new(
            "feed",
            format!("{}/v3/index.json", server.url()),
            HttpClient::new().unwrap(),
        );
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let page = source
                .fetch_page(&Query::new("x"), None, &cancel)
                .await
                .unwrap();
            assert!(page.items.is_empty());
            assert!(page.is_last());
        }

        index_mock.assert_async().await;
        search.assert_async().await;
    }

    #[tokio::test]
    async fn test_nuget_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/query")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let source = source_for(&server);
        let result = source
            .fetch_page(&Query::new("x"), None, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(SourceError::Api(_))));
    }

    #[tokio::test]
    async fn test_nuget_cursor_out_of_range() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/query")
            .match_query(mockito::Matcher::Any)
            .with_body(PAGE_TWO)
            .create_async()
            .await;

        let source = source_for(&server);
        let query = Query::new("serilog");
        let token = ContinuationToken::new("test-feed", &query, usize::MAX.to_string());
        let result = source
            .fetch_page(&query, Some(&token), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(SourceError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_nuget_cancelled() {
        let server = mockito::Server::new_async().await;
        let source = source_for(&server);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = source.fetch_page(&Query::new("x"), None, &cancel).await;
        assert_eq!(result, Err(SourceError::Cancelled));
    }
}
