use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use sandbox_protocol::LogLevel;
use serde::Deserialize;
use serde_json::{Value, json};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use super::HostError;
use super::fetch::{AdaptiveRetryFetcher, FetchOptions};
use super::page::{BrowserTabs, TabInfo};
use crate::logger::Logger;
use crate::sandbox::HostFunctions;

/// Host operations addressable as `host.<name>` from a workflow step or by
/// name from a sandbox `host_call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr, EnumIter)]
pub enum HostTool {
    #[strum(serialize = "getActivePageContent")]
    GetActivePageContent,
    #[strum(serialize = "getElements")]
    GetElements,
    #[strum(serialize = "host_fetch")]
    HostFetch,
    #[strum(serialize = "sendMessageToChat")]
    SendMessageToChat,
}

impl HostTool {
    /// Maps positional `host_call` arguments onto the input object a
    /// workflow step would pass.
    pub fn input_from_args(self, args: Vec<Value>) -> Result<Value, HostError> {
        let first = args.into_iter().next().unwrap_or(Value::Null);
        match (self, first) {
            (_, Value::Object(map)) => Ok(Value::Object(map)),
            (_, Value::Null) => Ok(json!({})),
            (HostTool::GetActivePageContent | HostTool::GetElements, Value::Array(selectors)) => {
                Ok(json!({ "selectors": selectors }))
            }
            (HostTool::GetActivePageContent | HostTool::GetElements, Value::String(selector)) => {
                Ok(json!({ "selectors": [selector] }))
            }
            (HostTool::HostFetch, Value::String(url)) => Ok(json!({ "url": url })),
            (HostTool::SendMessageToChat, Value::String(content)) => Ok(json!({ "content": content })),
            (tool, other) => Err(HostError::InvalidArguments {
                func: tool.to_string(),
                reason: format!("unexpected argument {other}"),
            }),
        }
    }
}

fn default_selectors() -> Vec<String> {
    vec!["body".to_string()]
}

#[derive(Debug, Deserialize)]
struct SelectorInput {
    #[serde(default = "default_selectors")]
    selectors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FetchInput {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

fn parse_input<T: for<'de> Deserialize<'de>>(tool: HostTool, input: &Value) -> Result<T, HostError> {
    serde_json::from_value(input.clone()).map_err(|e| HostError::InvalidArguments {
        func: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Dispatches named host operations against the browser and the network.
pub struct HostCapabilityRouter {
    tabs: Arc<dyn BrowserTabs>,
    fetcher: Arc<AdaptiveRetryFetcher>,
    logger: Logger,
    self_url: String,
}

impl HostCapabilityRouter {
    pub fn new(
        tabs: Arc<dyn BrowserTabs>,
        fetcher: Arc<AdaptiveRetryFetcher>,
        logger: Logger,
        self_url: impl Into<String>,
    ) -> Self {
        Self {
            tabs,
            fetcher,
            logger,
            self_url: self_url.into(),
        }
    }

    pub async fn invoke(&self, tool: HostTool, input: &Value) -> Result<Value, HostError> {
        match tool {
            HostTool::GetActivePageContent => {
                let input: SelectorInput = parse_input(tool, input)?;
                self.active_page_content(&input.selectors).await
            }
            HostTool::GetElements => {
                let input: SelectorInput = parse_input(tool, input)?;
                self.elements(&input.selectors).await
            }
            HostTool::HostFetch => {
                let input: FetchInput = parse_input(tool, input)?;
                self.host_fetch(input).await
            }
            HostTool::SendMessageToChat => Ok(self.send_message_to_chat(input)),
        }
    }

    /// Entry point for sandbox `host_call`s.
    pub async fn call(&self, func: &str, args: Vec<Value>) -> Result<Value, HostError> {
        let tool = HostTool::from_str(func).map_err(|_| HostError::UnknownFunction(func.to_string()))?;
        let input = tool.input_from_args(args)?;
        self.invoke(tool, &input).await
    }

    /// First tab of the current window that is a web page and not our own UI.
    pub async fn find_target_tab(&self) -> Result<TabInfo, HostError> {
        self.logger.log(LogLevel::Debug, "HOST", "Looking for the target tab...");
        let tabs = self.tabs.current_window_tabs().await?;
        let target = tabs.into_iter().find(|tab| match tab.url.as_deref() {
            Some(url) => url != self.self_url && url.starts_with("http"),
            None => false,
        });

        match target {
            Some(tab) => {
                let url = tab.url.as_deref().unwrap_or_default();
                let shown: String = url.chars().take(70).collect();
                self.logger.log(LogLevel::Debug, "HOST", &format!("Target tab found: {shown}"));
                Ok(tab)
            }
            None => {
                let err = HostError::NoEligibleTab;
                self.logger.log(LogLevel::Error, "HOST", &err.to_string());
                Err(err)
            }
        }
    }

    pub async fn active_page_content(&self, selectors: &[String]) -> Result<Value, HostError> {
        let tab = self.find_target_tab().await?;
        let html = self.tabs.page_content(tab.id, selectors).await?;
        Ok(json!({ "html": html }))
    }

    pub async fn elements(&self, selectors: &[String]) -> Result<Value, HostError> {
        let tab = self.find_target_tab().await?;
        let elements = self.tabs.elements(tab.id, selectors).await?;
        Ok(json!({ "elements": elements }))
    }

    async fn host_fetch(&self, input: FetchInput) -> Result<Value, HostError> {
        let method = match input.method.as_deref() {
            None => Method::GET,
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|e| {
                HostError::InvalidArguments {
                    func: HostTool::HostFetch.to_string(),
                    reason: e.to_string(),
                }
            })?,
        };
        let options = FetchOptions {
            method,
            headers: input.headers.into_iter().collect(),
            body: input.body,
        };
        let data = self.fetcher.fetch_with_retry(&input.url, &options).await?;
        Ok(json!({ "data": data }))
    }

    fn send_message_to_chat(&self, input: &Value) -> Value {
        let content = match input.get("content").unwrap_or(input) {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        self.logger.log(LogLevel::Info, "PLUGIN", &content);
        Value::Null
    }
}

#[async_trait]
impl HostFunctions for HostCapabilityRouter {
    async fn call(&self, func: &str, args: Vec<Value>) -> Result<Value, String> {
        HostCapabilityRouter::call(self, func, args)
            .await
            .map_err(|e| e.to_string())
    }
}
