use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::HostError;

/// Characters of text kept per extracted element.
pub const TEXT_CONTENT_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: u32,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    pub tag_name: String,
    pub text_content: String,
    pub attributes: Vec<AttributeInfo>,
}

/// Tabs of the current browser window.
#[async_trait]
pub trait BrowserTabs: Send + Sync {
    async fn current_window_tabs(&self) -> Result<Vec<TabInfo>, HostError>;

    /// Outer HTML of the first match of each selector, newline-joined.
    async fn page_content(&self, tab_id: u32, selectors: &[String]) -> Result<String, HostError>;

    /// Every match of each selector, one list per selector.
    async fn elements(&self, tab_id: u32, selectors: &[String]) -> Result<Vec<Vec<ElementInfo>>, HostError>;
}

struct Snapshot {
    tab: TabInfo,
    html: Arc<str>,
}

/// A window made of static HTML snapshots, one per tab.
#[derive(Default)]
pub struct SnapshotTabs {
    tabs: RwLock<Vec<Snapshot>>,
    next_id: AtomicU32,
}

impl SnapshotTabs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a tab showing `html` at `url`; returns its id.
    pub fn open(&self, url: &str, html: impl Into<String>) -> Result<u32, HostError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let html: String = html.into();
        let snapshot = Snapshot {
            tab: TabInfo {
                id,
                url: Some(url.to_string()),
            },
            html: Arc::from(html),
        };
        self.tabs
            .write()
            .map_err(|_| HostError::Tabs("tab list is poisoned".to_string()))?
            .push(snapshot);
        Ok(id)
    }

    pub fn close(&self, tab_id: u32) {
        if let Ok(mut tabs) = self.tabs.write() {
            tabs.retain(|s| s.tab.id != tab_id);
        }
    }

    /// Downloads `url` and opens it as a new tab.
    pub async fn capture(&self, client: &reqwest::Client, url: &str) -> Result<u32, HostError> {
        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HostError::Tabs(format!("could not load {url}: {e}")))?;
        let html = response
            .text()
            .await
            .map_err(|e| HostError::Tabs(format!("could not read {url}: {e}")))?;
        self.open(url, html)
    }

    fn html_of(&self, tab_id: u32) -> Result<Arc<str>, HostError> {
        let tabs = self
            .tabs
            .read()
            .map_err(|_| HostError::Tabs("tab list is poisoned".to_string()))?;
        tabs.iter()
            .find(|s| s.tab.id == tab_id)
            .map(|s| s.html.clone())
            .ok_or_else(|| HostError::Tabs(format!("tab {tab_id} is gone")))
    }
}

#[async_trait]
impl BrowserTabs for SnapshotTabs {
    async fn current_window_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        let tabs = self
            .tabs
            .read()
            .map_err(|_| HostError::Tabs("tab list is poisoned".to_string()))?;
        Ok(tabs.iter().map(|s| s.tab.clone()).collect())
    }

    async fn page_content(&self, tab_id: u32, selectors: &[String]) -> Result<String, HostError> {
        let html = self.html_of(tab_id)?;
        extract_content(&html, selectors)
    }

    async fn elements(&self, tab_id: u32, selectors: &[String]) -> Result<Vec<Vec<ElementInfo>>, HostError> {
        let html = self.html_of(tab_id)?;
        extract_elements(&html, selectors)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, HostError> {
    Selector::parse(selector).map_err(|e| HostError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

pub fn extract_content(html: &str, selectors: &[String]) -> Result<String, HostError> {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();
    for selector in selectors {
        let selector = parse_selector(selector)?;
        if let Some(element) = document.select(&selector).next() {
            parts.push(element.html());
        }
    }
    Ok(parts.join("\n"))
}

pub fn extract_elements(html: &str, selectors: &[String]) -> Result<Vec<Vec<ElementInfo>>, HostError> {
    let document = Html::parse_document(html);
    selectors
        .iter()
        .map(|selector| {
            let selector = parse_selector(selector)?;
            Ok(document
                .select(&selector)
                .map(|element| ElementInfo {
                    tag_name: element.value().name().to_ascii_uppercase(),
                    text_content: element.text().collect::<String>().chars().take(TEXT_CONTENT_LIMIT).collect(),
                    attributes: element
                        .value()
                        .attrs()
                        .map(|(name, value)| AttributeInfo {
                            name: name.to_string(),
                            value: value.to_string(),
                        })
                        .collect(),
                })
                .collect())
        })
        .collect()
}
