//! Registry of the configured package sources.

use std::sync::Arc;

use super::{LocalFolderSource, NuGetSearchSource, SourceError, SourceSearchClient};
use crate::config::{Config, SourceKind};
use crate::utils::{HttpClient, RetryingSource};

/// Ordered collection of package sources
///
/// Registration order is merge precedence: when two sources report the same
/// package version, the copy from the earlier source is kept.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn SourceSearchClient>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the enabled sources of `config`.
    ///
    /// Every source is wrapped in a [`RetryingSource`] using the configured
    /// retry policy. HTTP sources share one client and rate limiter.
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let retry = config.retry.to_retry_config();
        let page_size = config.loader.page_size;
        let http = HttpClient::new()?.rate_limit(config.rate_limits.default_requests_per_second);

        let mut registry = Self::new();
        for source in config.enabled_sources() {
            let client: Arc<dyn SourceSearchClient> = match source.kind {
                SourceKind::NuGet => Arc::new(
                    NuGetSearchSource::new(&source.id, &source.endpoint, http.clone())
                        .page_size(page_size),
                ),
                SourceKind::Local => Arc::new(
                    LocalFolderSource::new(&source.id, &source.endpoint).page_size(page_size),
                ),
            };
            registry.try_register(Arc::new(RetryingSource::new(client, retry)))?;
        }

        tracing::debug!(sources = ?registry.ids(), "Source registry built from config");
        Ok(registry)
    }

    /// Register a new source at the end of the precedence order.
    ///
    /// A source whose id is already registered replaces the earlier one in place.
    pub fn register(&mut self, source: Arc<dyn SourceSearchClient>) {
        match self.sources.iter().position(|s| s.id() == source.id()) {
            Some(index) => self.sources[index] = source,
            None => self.sources.push(source),
        }
    }

    /// Register a new source, rejecting duplicate ids
    pub fn try_register(&mut self, source: Arc<dyn SourceSearchClient>) -> Result<(), SourceError> {
        if self.has(source.id()) {
            return Err(SourceError::InvalidRequest(format!(
                "Duplicate source id '{}'",
                source.id()
            )));
        }
        self.sources.push(source);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, source: Arc<dyn SourceSearchClient>) -> Self {
        self.register(source);
        self
    }

    /// Get a source by ID
    pub fn get(&self, id: &str) -> Option<&Arc<dyn SourceSearchClient>> {
        self.sources.iter().find(|s| s.id() == id)
    }

    /// Get a source by ID, returning an error if not found
    pub fn get_required(&self, id: &str) -> Result<&Arc<dyn SourceSearchClient>, SourceError> {
        self.get(id)
            .ok_or_else(|| SourceError::NotFound(format!("Source '{}' not found", id)))
    }

    /// Check if a source exists
    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Keep only the sources named in `ids`, preserving registry order
    pub fn retain_ids(&mut self, ids: &[String]) -> Result<(), SourceError> {
        for id in ids {
            self.get_required(id)?;
        }
        self.sources.retain(|s| ids.iter().any(|id| id == s.id()));
        Ok(())
    }

    /// All sources, in precedence order
    pub fn all(&self) -> &[Arc<dyn SourceSearchClient>] {
        &self.sources
    }

    /// Source ids, in precedence order
    pub fn ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source is registered
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::sources::ScriptedSource;

    #[test]
    fn test_registration_order_is_kept() {
        let registry = SourceRegistry::new()
            .with(Arc::new(ScriptedSource::new("b")))
            .with(Arc::new(ScriptedSource::new("a")))
            .with(Arc::new(ScriptedSource::new("c")));

        assert_eq!(registry.ids(), vec!["b", "a", "c"]);
        assert!(registry.has("a"));
        assert!(registry.get("missing").is_none());
        assert!(matches!(
            registry.get_required("missing"),
            Err(SourceError::NotFound(_))
        ));
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = SourceRegistry::new()
            .with(Arc::new(ScriptedSource::new("a")))
            .with(Arc::new(ScriptedSource::new("b")));
        registry.register(Arc::new(ScriptedSource::new("a")));

        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert!(registry
            .try_register(Arc::new(ScriptedSource::new("b")))
            .is_err());
    }

    #[test]
    fn test_retain_ids() {
        let mut registry = SourceRegistry::new()
            .with(Arc::new(ScriptedSource::new("a")))
            .with(Arc::new(ScriptedSource::new("b")))
            .with(Arc::new(ScriptedSource::new("c")));

        registry
            .retain_ids(&["c".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(registry.ids(), vec!["a", "c"]);
        assert!(registry.retain_ids(&["zzz".to_string()]).is_err());
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.sources.push(SourceConfig {
            id: "local".to_string(),
            kind: SourceKind::Local,
            endpoint: "/srv/packages".to_string(),
            enabled: true,
        });
        config.sources.push(SourceConfig {
            id: "off".to_string(),
            kind: SourceKind::Local,
            endpoint: "/srv/other".to_string(),
            enabled: false,
        });

        let registry = SourceRegistry::from_config(&config).unwrap();
        assert_eq!(registry.ids(), vec!["nuget.org", "local"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_from_config_rejects_duplicates() {
        let mut config = Config::default();
        config.sources.push(config.sources[0].clone());
        assert!(matches!(
            SourceRegistry::from_config(&config),
            Err(SourceError::InvalidRequest(_))
        ));
    }
}
