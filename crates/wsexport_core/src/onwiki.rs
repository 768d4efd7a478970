use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::api::{FetchError, WikiApi, page_url, raw_page_url};
use crate::cache::Cache;

pub const CONFIG_PAGE: &str = "MediaWiki:WS_Export.json";
/// On-wiki configuration is cached for one month.
pub const CONFIG_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// The origin could not be contacted while resolving the on-wiki
/// configuration. Carries the browsable page URL so the message can be shown
/// to users as-is; the transport cause stays attached as the source.
#[derive(Debug, Error)]
#[error("the configuration page {page_url} could not be retrieved")]
pub struct ConfigUnavailable {
    pub page_url: String,
    #[source]
    pub source: FetchError,
}

/// Per-language configuration hosted on the wiki itself, resolved through
/// two cache tiers: a process-local map, then an injected TTL cache store.
pub struct OnWikiConfig {
    api: Mutex<Box<dyn WikiApi + Send>>,
    cache: Box<dyn Cache>,
    resolved: Mutex<BTreeMap<String, Map<String, Value>>>,
}

impl OnWikiConfig {
    pub fn new(api: Box<dyn WikiApi + Send>, cache: Box<dyn Cache>) -> Self {
        Self {
            api: Mutex::new(api),
            cache,
            resolved: Mutex::new(BTreeMap::new()),
        }
    }

    /// Decoded configuration for `lang`. A process-local hit returns without
    /// touching the cache store or the network. A missing, empty, or
    /// malformed config page is the valid "no configuration" state and
    /// yields an empty mapping; only an unreachable origin errors, and that
    /// error downcasts to [`ConfigUnavailable`].
    pub fn resolve(&self, lang: &str) -> Result<Map<String, Value>> {
        let mut resolved = self
            .resolved
            .lock()
            .map_err(|_| anyhow!("on-wiki config mutex poisoned"))?;
        if let Some(config) = resolved.get(lang) {
            return Ok(config.clone());
        }

        let mut api = self
            .api
            .lock()
            .map_err(|_| anyhow!("wiki api mutex poisoned"))?;
        api.set_lang(lang);
        let domain = api.domain_name();
        let data_url = raw_page_url(&domain, CONFIG_PAGE, "application/json");
        let key = format!("OnWikiConfig_{lang}");

        let body = self.cache.get_or_compute(&key, CONFIG_TTL, &mut || {
            match api.get(&data_url) {
                Ok(body) => Ok(body),
                Err(error @ FetchError::Unreachable { .. }) => {
                    Err(anyhow::Error::new(ConfigUnavailable {
                        page_url: page_url(&domain, CONFIG_PAGE),
                        source: error,
                    }))
                }
                // Reachable but absent or unreadable: the config page
                // legitimately may not exist.
                Err(_) => Ok(String::new()),
            }
        })?;

        let config = match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        resolved.insert(lang.to_string(), config.clone());
        Ok(config)
    }

    /// Name of the default font to embed in exports; empty string when no
    /// preference is configured.
    pub fn default_font(&self, lang: &str) -> Result<String> {
        let config = self.resolve(lang)?;
        Ok(config
            .get("defaultFont")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::Result;

    use super::{CONFIG_PAGE, ConfigUnavailable, OnWikiConfig};
    use crate::api::{FetchError, WikiApi};
    use crate::cache::{Cache, MemoryCache};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum MockOutcome {
        Body,
        Missing,
        Unreachable,
    }

    struct MockApi {
        lang: String,
        body: String,
        outcome: MockOutcome,
        requests: Arc<AtomicUsize>,
    }

    impl MockApi {
        fn with_body(body: &str, requests: Arc<AtomicUsize>) -> Self {
            Self {
                lang: String::new(),
                body: body.to_string(),
                outcome: MockOutcome::Body,
                requests,
            }
        }

        fn with_outcome(outcome: MockOutcome, requests: Arc<AtomicUsize>) -> Self {
            Self {
                lang: String::new(),
                body: String::new(),
                outcome,
                requests,
            }
        }
    }

    impl WikiApi for MockApi {
        fn set_lang(&mut self, lang: &str) {
            self.lang = lang.to_string();
        }

        fn lang(&self) -> &str {
            &self.lang
        }

        fn domain_name(&self) -> String {
            format!("{}.wikisource.org", self.lang)
        }

        fn get(&mut self, url: &str) -> Result<String, FetchError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                MockOutcome::Body => Ok(self.body.clone()),
                MockOutcome::Missing => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
                MockOutcome::Unreachable => Err(FetchError::Unreachable {
                    url: url.to_string(),
                    message: "connection refused".to_string(),
                }),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    /// Delegating handle so a test can keep the backing cache after handing
    /// a `Box<dyn Cache>` to the resolver.
    struct SharedCache(Arc<MemoryCache>);

    impl Cache for SharedCache {
        fn get_or_compute(
            &self,
            key: &str,
            ttl: Duration,
            generator: &mut dyn FnMut() -> Result<String>,
        ) -> Result<String> {
            self.0.get_or_compute(key, ttl, generator)
        }
    }

    fn resolver_with_body(body: &str) -> (OnWikiConfig, Arc<AtomicUsize>) {
        let requests = Arc::new(AtomicUsize::new(0));
        let api = MockApi::with_body(body, requests.clone());
        let onwiki = OnWikiConfig::new(Box::new(api), Box::new(MemoryCache::new()));
        (onwiki, requests)
    }

    #[test]
    fn default_font_reads_config_value() {
        let (onwiki, _) = resolver_with_body("{\"defaultFont\":\"FreeSerif\"}");
        assert_eq!(onwiki.default_font("en").expect("font"), "FreeSerif");
    }

    #[test]
    fn default_font_is_empty_when_key_absent_or_not_a_string() {
        let (onwiki, _) = resolver_with_body("{\"other\":1}");
        assert_eq!(onwiki.default_font("en").expect("font"), "");

        let (onwiki, _) = resolver_with_body("{\"defaultFont\":42}");
        assert_eq!(onwiki.default_font("en").expect("font"), "");
    }

    #[test]
    fn malformed_json_resolves_to_empty_config() {
        for body in ["not json", "", "[1, 2]"] {
            let (onwiki, _) = resolver_with_body(body);
            let config = onwiki.resolve("en").expect("resolve");
            assert!(config.is_empty());
        }
    }

    #[test]
    fn missing_page_resolves_to_empty_config() {
        let requests = Arc::new(AtomicUsize::new(0));
        let api = MockApi::with_outcome(MockOutcome::Missing, requests);
        let onwiki = OnWikiConfig::new(Box::new(api), Box::new(MemoryCache::new()));
        assert_eq!(onwiki.default_font("en").expect("font"), "");
    }

    #[test]
    fn unreachable_origin_fails_with_browsable_page_url() {
        let requests = Arc::new(AtomicUsize::new(0));
        let api = MockApi::with_outcome(MockOutcome::Unreachable, requests);
        let onwiki = OnWikiConfig::new(Box::new(api), Box::new(MemoryCache::new()));

        let error = onwiki.default_font("en").expect_err("must fail");
        let unavailable = error
            .downcast_ref::<ConfigUnavailable>()
            .expect("typed error");
        assert_eq!(
            unavailable.page_url,
            format!("https://en.wikisource.org/wiki/{CONFIG_PAGE}")
        );
        assert!(error.to_string().contains("/wiki/"));
        assert!(!error.to_string().contains("action=raw"));
        assert!(unavailable.source.is_unreachable());
    }

    #[test]
    fn second_resolve_within_ttl_does_not_contact_the_origin() {
        let (onwiki, requests) = resolver_with_body("{\"defaultFont\":\"serif\"}");
        onwiki.default_font("en").expect("first");
        onwiki.default_font("en").expect("second");
        onwiki.resolve("en").expect("third");
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn languages_resolve_independently() {
        let (onwiki, requests) = resolver_with_body("{\"defaultFont\":\"serif\"}");
        onwiki.default_font("en").expect("en");
        onwiki.default_font("fr").expect("fr");
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_store_tier_survives_a_new_resolver() {
        let backing = Arc::new(MemoryCache::new());
        let requests = Arc::new(AtomicUsize::new(0));

        let api = MockApi::with_body("{\"defaultFont\":\"serif\"}", requests.clone());
        let onwiki = OnWikiConfig::new(Box::new(api), Box::new(SharedCache(backing.clone())));
        assert_eq!(onwiki.default_font("en").expect("font"), "serif");

        // Fresh resolver, same store: the page body comes from the cache.
        let api = MockApi::with_outcome(MockOutcome::Unreachable, requests.clone());
        let onwiki = OnWikiConfig::new(Box::new(api), Box::new(SharedCache(backing)));
        assert_eq!(onwiki.default_font("en").expect("font"), "serif");
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }
}
