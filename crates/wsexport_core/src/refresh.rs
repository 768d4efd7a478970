use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::api::{FetchError, WikiApi, query_url, raw_page_url};
use crate::storage::ArtifactStore;

pub const I18N_PAGE: &str = "MediaWiki:Wsexport_i18n.ini";
pub const CSS_PAGE: &str = "MediaWiki:Epub.css";
pub const ABOUT_PAGE: &str = "MediaWiki:Wsexport_about";

pub const ARTIFACT_I18N: &str = "i18n";
pub const ARTIFACT_CSS: &str = "epub.css";
pub const ARTIFACT_ABOUT: &str = "about.xhtml";
pub const ARTIFACT_NAMESPACES: &str = "namespaces";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Updated,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResult {
    pub name: String,
    pub status: ArtifactStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub lang: String,
    pub success: bool,
    pub updated: usize,
    pub failed: usize,
    pub artifacts: Vec<ArtifactResult>,
    pub errors: Vec<String>,
    pub request_count: usize,
}

/// Force-update all four artifacts for the language the API is bound to.
/// Every call re-fetches from the origin: no caching, no throttling, no
/// retry. One artifact failing never aborts the others; the report lists
/// which artifacts were persisted and which failed, with cause.
pub fn refresh_with_api(
    api: &mut dyn WikiApi,
    store: &mut dyn ArtifactStore,
) -> Result<RefreshReport> {
    let lang = api.lang().to_string();
    let mut report = RefreshReport {
        lang: lang.clone(),
        success: true,
        updated: 0,
        failed: 0,
        artifacts: Vec::new(),
        errors: Vec::new(),
        request_count: 0,
    };

    let outcome = update_translations(api, store, &lang);
    record(&mut report, ARTIFACT_I18N, outcome);
    let outcome = update_stylesheet(api, store, &lang);
    record(&mut report, ARTIFACT_CSS, outcome);
    let outcome = update_about(api, store, &lang);
    record(&mut report, ARTIFACT_ABOUT, outcome);
    let outcome = update_namespaces(api, store, &lang);
    record(&mut report, ARTIFACT_NAMESPACES, outcome);

    report.request_count = api.request_count();
    Ok(report)
}

fn record(report: &mut RefreshReport, name: &str, outcome: Result<()>) {
    match outcome {
        Ok(()) => {
            report.updated += 1;
            report.artifacts.push(ArtifactResult {
                name: name.to_string(),
                status: ArtifactStatus::Updated,
                detail: None,
            });
        }
        Err(error) => {
            report.failed += 1;
            report.success = false;
            let detail = format!("{error:#}");
            report.errors.push(format!("{name}: {detail}"));
            report.artifacts.push(ArtifactResult {
                name: name.to_string(),
                status: ArtifactStatus::Failed,
                detail: Some(detail),
            });
        }
    }
}

/// Fetch a page body, mapping an HTTP error status to `None`: the site
/// answered and the page is absent, which normalizes to a default artifact
/// rather than a failure.
fn fetch_or_absent(api: &mut dyn WikiApi, url: &str) -> Result<Option<String>, FetchError> {
    match api.get(url) {
        Ok(body) => Ok(Some(body)),
        Err(FetchError::Status { .. }) => Ok(None),
        Err(error) => Err(error),
    }
}

fn update_translations(
    api: &mut dyn WikiApi,
    store: &mut dyn ArtifactStore,
    lang: &str,
) -> Result<()> {
    let url = raw_page_url(&api.domain_name(), I18N_PAGE, "text/plain");
    let body = fetch_or_absent(api, &url)?.unwrap_or_default();
    let table = parse_translations(&body);
    let bytes = serde_json::to_vec(&table).context("failed to serialize translation table")?;
    store.store(lang, ARTIFACT_I18N, &bytes)
}

fn update_stylesheet(
    api: &mut dyn WikiApi,
    store: &mut dyn ArtifactStore,
    lang: &str,
) -> Result<()> {
    let url = raw_page_url(&api.domain_name(), CSS_PAGE, "text/css");
    let body = fetch_or_absent(api, &url)?.unwrap_or_default();
    store.store(lang, ARTIFACT_CSS, body.as_bytes())
}

fn update_about(api: &mut dyn WikiApi, store: &mut dyn ArtifactStore, lang: &str) -> Result<()> {
    let url = query_url(
        &api.domain_name(),
        &[
            ("titles", ABOUT_PAGE),
            ("prop", "revisions"),
            ("rvprop", "content"),
        ],
    );
    let body = fetch_or_absent(api, &url)?.unwrap_or_default();
    let payload = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
    let content = extract_about_content(&payload, ABOUT_PAGE);
    store.store(lang, ARTIFACT_ABOUT, content.as_bytes())
}

fn update_namespaces(
    api: &mut dyn WikiApi,
    store: &mut dyn ArtifactStore,
    lang: &str,
) -> Result<()> {
    let url = query_url(
        &api.domain_name(),
        &[
            ("meta", "siteinfo"),
            ("siprop", "namespaces|namespacealiases"),
        ],
    );
    let body = fetch_or_absent(api, &url)?.unwrap_or_default();
    let payload = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
    let namespaces = build_namespace_map(&payload);
    let bytes = serde_json::to_vec(&namespaces).context("failed to serialize namespace map")?;
    store.store(lang, ARTIFACT_NAMESPACES, &bytes)
}

/// Parse `key = "value"` lines into a translation table. Quotes are optional
/// (double or single), whitespace is tolerated, malformed lines are skipped,
/// and the last occurrence of a duplicate key wins.
pub fn parse_translations(content: &str) -> BTreeMap<String, String> {
    let mut table = BTreeMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with(';')
            || trimmed.starts_with('#')
            || trimmed.starts_with('[')
        {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = strip_quotes(value.trim());
        table.insert(key.to_string(), value.to_string());
    }
    table
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Pull the latest revision's raw content out of a query-API envelope,
/// preferring the page whose title matches. Missing pieces anywhere in the
/// envelope yield an empty string.
pub fn extract_about_content(payload: &Value, title: &str) -> String {
    let pages = match payload.get("query").and_then(|query| query.get("pages")) {
        Some(Value::Array(pages)) => pages.iter().collect::<Vec<_>>(),
        Some(Value::Object(pages)) => pages.values().collect::<Vec<_>>(),
        _ => return String::new(),
    };
    let page = pages
        .iter()
        .find(|page| page.get("title").and_then(Value::as_str) == Some(title))
        .or_else(|| pages.first());

    page.and_then(|page| page.get("revisions"))
        .and_then(Value::as_array)
        .and_then(|revisions| revisions.first())
        .and_then(|revision| revision.get("*"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Build the namespace map from a siteinfo envelope: canonical namespaces
/// first, then aliases resolved through their target id. Ids are kept as the
/// exact strings received. Aliases whose target id is absent from the
/// canonical set are dropped.
pub fn build_namespace_map(payload: &Value) -> BTreeMap<String, String> {
    let mut canonical = BTreeMap::new();
    match payload.get("query").and_then(|query| query.get("namespaces")) {
        Some(Value::Object(entries)) => {
            for (id, entry) in entries {
                if let Some(name) = namespace_name(entry) {
                    canonical.insert(id.clone(), name);
                }
            }
        }
        Some(Value::Array(entries)) => {
            for (index, entry) in entries.iter().enumerate() {
                let id = entry_id(entry).unwrap_or_else(|| index.to_string());
                if let Some(name) = namespace_name(entry) {
                    canonical.insert(id, name);
                }
            }
        }
        _ => {}
    }

    let mut namespaces = canonical.clone();
    if let Some(aliases) = payload
        .get("query")
        .and_then(|query| query.get("namespacealiases"))
        .and_then(Value::as_array)
    {
        for alias in aliases {
            let Some(target_id) = entry_id(alias) else {
                continue;
            };
            merge_alias(&mut namespaces, &canonical, &target_id, &target_id);
        }
    }
    namespaces
}

/// Second pass of the map build: an alias contributes its id mapped to the
/// canonical name of its target; a dangling target is skipped.
fn merge_alias(
    namespaces: &mut BTreeMap<String, String>,
    canonical: &BTreeMap<String, String>,
    alias_id: &str,
    target_id: &str,
) {
    if let Some(name) = canonical.get(target_id) {
        namespaces.insert(alias_id.to_string(), name.clone());
    }
}

fn entry_id(entry: &Value) -> Option<String> {
    match entry.get("id") {
        Some(Value::Number(id)) => Some(id.to_string()),
        Some(Value::String(id)) => Some(id.clone()),
        _ => None,
    }
}

fn namespace_name(entry: &Value) -> Option<String> {
    let name = entry.get("*").and_then(Value::as_str)?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
