//! Fetching page text from the school website or a content API.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::site::html::{html_to_text, truncate_chars};
use crate::site::{Page, PageSpec, SiteContent};

/// Timeout for a single page request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can produce a fresh snapshot of the site.
///
/// `previous` is the snapshot being replaced; pages that fail to load keep
/// their text from it.
pub trait ContentSource {
    fn load(&self, previous: &SiteContent) -> impl Future<Output = SiteContent> + Send;
}

#[derive(Debug)]
pub enum LoadError {
    Http(String),
    Status(u16),
    Parse(String),
    MissingPage,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Http(e) => write!(f, "HTTP error: {e}"),
            LoadError::Status(code) => write!(f, "unexpected status {code}"),
            LoadError::Parse(e) => write!(f, "Parse error: {e}"),
            LoadError::MissingPage => write!(f, "page missing from content API"),
        }
    }
}

impl std::error::Error for LoadError {}

enum Source {
    /// Scrape `base_url + path` for every page.
    Scrape { base_url: String },
    /// One JSON object mapping page names to text.
    ContentApi { url: String },
}

pub struct SiteLoader {
    http: reqwest::Client,
    source: Source,
    pages: Vec<PageSpec>,
    page_char_budget: usize,
}

impl SiteLoader {
    pub fn scrape(base_url: impl Into<String>, pages: Vec<PageSpec>, page_char_budget: usize) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self::with_source(Source::Scrape { base_url }, pages, page_char_budget)
    }

    pub fn content_api(url: impl Into<String>, pages: Vec<PageSpec>, page_char_budget: usize) -> Self {
        Self::with_source(Source::ContentApi { url: url.into() }, pages, page_char_budget)
    }

    /// The content API wins over scraping when both are configured.
    pub fn from_config(config: &Config) -> Self {
        match (&config.content_api_url, &config.site_base_url) {
            (Some(url), _) => Self::content_api(url.clone(), config.pages.clone(), config.page_char_budget),
            (None, Some(base)) => Self::scrape(base.clone(), config.pages.clone(), config.page_char_budget),
            (None, None) => Self::scrape(String::new(), config.pages.clone(), config.page_char_budget),
        }
    }

    fn with_source(source: Source, pages: Vec<PageSpec>, page_char_budget: usize) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("guitarbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client, using defaults: {e}");
                reqwest::Client::new()
            });
        Self {
            http,
            source,
            pages,
            page_char_budget,
        }
    }

    pub fn pages(&self) -> &[PageSpec] {
        &self.pages
    }

    async fn get_text(&self, url: &str) -> Result<String, LoadError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status(status.as_u16()));
        }

        response.text().await.map_err(|e| LoadError::Http(e.to_string()))
    }

    async fn scrape_page(&self, base_url: &str, spec: &PageSpec) -> Result<String, LoadError> {
        let url = if spec.path.starts_with('/') {
            format!("{base_url}{}", spec.path)
        } else {
            format!("{base_url}/{}", spec.path)
        };
        debug!("Fetching {url}");
        let html = self.get_text(&url).await?;
        Ok(html_to_text(&html))
    }

    async fn fetch_api(&self, url: &str) -> Result<HashMap<String, String>, LoadError> {
        let body = self.get_text(url).await?;
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| LoadError::Parse(e.to_string()))?;

        let object = match value.get("pages") {
            Some(serde_json::Value::Object(pages)) => pages,
            _ => value
                .as_object()
                .ok_or_else(|| LoadError::Parse("expected a JSON object".into()))?,
        };

        Ok(object
            .iter()
            .filter_map(|(name, text)| text.as_str().map(|t| (name.clone(), t.to_string())))
            .collect())
    }
}

impl ContentSource for SiteLoader {
    async fn load(&self, previous: &SiteContent) -> SiteContent {
        let api_pages = match &self.source {
            Source::ContentApi { url } => match self.fetch_api(url).await {
                Ok(pages) => Some(pages),
                Err(e) => {
                    warn!("Content API {url} failed: {e}");
                    None
                }
            },
            Source::Scrape { .. } => None,
        };

        let mut pages = Vec::with_capacity(self.pages.len());
        let mut failed = 0;

        for spec in &self.pages {
            let fresh = match &self.source {
                Source::Scrape { base_url } => self.scrape_page(base_url, spec).await,
                Source::ContentApi { .. } => match &api_pages {
                    Some(map) => map.get(&spec.name).cloned().ok_or(LoadError::MissingPage),
                    None => Err(LoadError::MissingPage),
                },
            };

            let text = match fresh {
                Ok(text) => truncate_chars(&text, self.page_char_budget).to_string(),
                Err(e) => {
                    failed += 1;
                    warn!("Failed to load page '{}': {e}", spec.name);
                    previous.get(&spec.name).unwrap_or_default().to_string()
                }
            };
            pages.push(Page {
                name: spec.name.clone(),
                text,
            });
        }

        let content = SiteContent {
            pages,
            refreshed_at: Some(Utc::now()),
        };
        info!(
            "📄 Site content refreshed: {} pages, {} chars, {} failed",
            content.pages.len(),
            content.total_chars(),
            failed
        );
        content
    }
}
