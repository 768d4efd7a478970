use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use thiserror::Error;

pub const DEFAULT_DOMAIN_TEMPLATE: &str = "{lang}.wikisource.org";
pub const DEFAULT_USER_AGENT: &str = "wsexport-rust/0.1";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Transport-level outcome of a single page fetch. `Unreachable` is the only
/// variant that means the origin could not be contacted at all; the others
/// mean the site answered but the page could not be delivered.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not reach {url}: {message}")]
    Unreachable { url: String, message: String },
    #[error("HTTP {status} while fetching {url}")]
    Status { url: String, status: u16 },
    #[error("failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

impl FetchError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Read seam against a wiki bound to one language at a time. Fetches are
/// single-attempt: retry policy, if any, belongs to the caller.
pub trait WikiApi {
    fn set_lang(&mut self, lang: &str);
    fn lang(&self) -> &str;
    fn domain_name(&self) -> String;
    fn get(&mut self, url: &str) -> Result<String, FetchError>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub domain_template: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_env() -> Self {
        Self::from_env_with_defaults(DEFAULT_DOMAIN_TEMPLATE, DEFAULT_USER_AGENT)
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Self {
        Self::from_env_with_defaults(&config.domain_template(), &config.user_agent())
    }

    fn from_env_with_defaults(domain_default: &str, user_agent_default: &str) -> Self {
        Self {
            domain_template: env_value("WSEXPORT_DOMAIN", domain_default),
            user_agent: env_value("WSEXPORT_USER_AGENT", user_agent_default),
            timeout_ms: env_value_u64("WSEXPORT_HTTP_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    lang: String,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn from_env() -> Result<Self> {
        Self::new(MediaWikiClientConfig::from_env())
    }

    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build wiki HTTP client")?;
        Ok(Self {
            client,
            config,
            lang: String::new(),
            request_count: 0,
        })
    }
}

impl WikiApi for MediaWikiClient {
    fn set_lang(&mut self, lang: &str) {
        self.lang = lang.trim().to_string();
    }

    fn lang(&self) -> &str {
        &self.lang
    }

    fn domain_name(&self) -> String {
        self.config.domain_template.replace("{lang}", &self.lang)
    }

    fn get(&mut self, url: &str) -> Result<String, FetchError> {
        self.request_count += 1;
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.config.user_agent.clone())
            .send()
            .map_err(|error| classify_send_error(url, &error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().map_err(|error| FetchError::Body {
            url: url.to_string(),
            message: error.to_string(),
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn classify_send_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_connect() || error.is_timeout() {
        return FetchError::Unreachable {
            url: url.to_string(),
            message: error.to_string(),
        };
    }
    FetchError::Body {
        url: url.to_string(),
        message: error.to_string(),
    }
}

/// Raw-content URL for a page, e.g.
/// `https://en.wikisource.org/w/index.php?title=MediaWiki:Epub.css&action=raw&ctype=text/css`.
pub fn raw_page_url(domain: &str, title: &str, ctype: &str) -> String {
    format!(
        "https://{domain}/w/index.php?title={}&action=raw&ctype={}",
        encode_query_value(&encode_title(title)),
        encode_query_value(ctype)
    )
}

/// Browsable URL for a page, the one shown to humans in error messages.
pub fn page_url(domain: &str, title: &str) -> String {
    format!("https://{domain}/wiki/{}", encode_title(title))
}

/// Query-API URL with the given extra parameters appended.
pub fn query_url(domain: &str, params: &[(&str, &str)]) -> String {
    let mut url = format!("https://{domain}/w/api.php?action=query&format=json");
    for (key, value) in params {
        url.push('&');
        url.push_str(key);
        url.push('=');
        url.push_str(&encode_query_value(value));
    }
    url
}

fn encode_title(title: &str) -> String {
    title.trim().replace(' ', "_")
}

fn encode_query_value(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' | b'/' => {
                output.push(byte as char);
            }
            _ => output.push_str(&format!("%{byte:02X}")),
        }
    }
    output
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
