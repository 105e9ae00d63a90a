//! School website content: loading, HTML stripping and the in-memory cache.

pub mod cache;
pub mod html;
pub mod loader;

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use cache::{spawn_refresher, SiteCache};
pub use loader::{ContentSource, SiteLoader};

/// A page to load: display name and path relative to the site base URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageSpec {
    pub name: String,
    pub path: String,
}

impl PageSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Plain text of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub name: String,
    pub text: String,
}

/// Snapshot of all configured pages, in configured order.
#[derive(Debug, Clone, Default)]
pub struct SiteContent {
    pub pages: Vec<Page>,
    /// When this snapshot was loaded. `None` until the first refresh.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl SiteContent {
    /// An empty snapshot holding one blank page per configured page.
    pub fn empty(specs: &[PageSpec]) -> Self {
        Self {
            pages: specs
                .iter()
                .map(|s| Page {
                    name: s.name.clone(),
                    text: String::new(),
                })
                .collect(),
            refreshed_at: None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pages
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.text.as_str())
    }

    /// True when no page has any text.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }

    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }
}
