use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::stats::HostStatsStore;
use crate::config::FetchSettings;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL {0:?} has no host")]
    MissingHost(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("response from {url} is not valid JSON: {reason}")]
    Decode { url: String, reason: String },

    #[error("network unreachable after {attempts} failed attempts (last error: {last})")]
    Connectivity { attempts: u32, last: String },
}

impl FetchError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, FetchError::Connectivity { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_budget: u32,
    pub headroom: u32,
    /// Failed attempts after which connectivity is probed once.
    pub probe_after: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub probe_url: String,
    pub probe_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&FetchSettings::default())
    }
}

impl From<&FetchSettings> for RetryPolicy {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            min_budget: 10,
            headroom: 5,
            probe_after: 5,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            probe_url: settings.probe_url.clone(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// `max(min_budget, max(history) + headroom)`, or `min_budget` without history.
    pub fn budget_for(&self, history: &[u32]) -> u32 {
        match history.iter().max() {
            Some(worst) => self.min_budget.max(worst.saturating_add(self.headroom)),
            None => self.min_budget,
        }
    }

    /// Wait after the `failed_attempt`-th failure: doubles from `initial_delay`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: None,
        }
    }
}

/// JSON fetcher whose retry budget adapts to how flaky each host has been.
pub struct AdaptiveRetryFetcher {
    client: reqwest::Client,
    stats: Arc<dyn HostStatsStore>,
    policy: RetryPolicy,
}

impl AdaptiveRetryFetcher {
    pub fn new(stats: Arc<dyn HostStatsStore>, policy: RetryPolicy) -> Self {
        Self::with_client(reqwest::Client::new(), stats, policy)
    }

    pub fn with_client(client: reqwest::Client, stats: Arc<dyn HostStatsStore>, policy: RetryPolicy) -> Self {
        Self { client, stats, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch_with_retry(&self, url: &str, options: &FetchOptions) -> Result<Value, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::MissingHost(url.to_string()))?
            .to_string();

        let history = self.stats.history(&host).await;
        let budget = self.policy.budget_for(&history);
        debug!(%host, budget, "fetching {url}");

        let mut last_error = None;
        for attempt in 1..=budget {
            match self.attempt(&parsed, options).await {
                Ok(value) => {
                    if let Err(e) = self.stats.record_success(&host, attempt).await {
                        warn!(%host, "could not record fetch statistics: {e}");
                    }
                    if attempt > 1 {
                        info!(%host, attempt, "fetch succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(%host, attempt, budget, "fetch attempt failed: {e}");

                    if attempt == self.policy.probe_after && !self.probe().await {
                        return Err(FetchError::Connectivity {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    last_error = Some(e);
                    if attempt < budget {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Transport {
            url: url.to_string(),
            reason: "retry budget is zero".to_string(),
        }))
    }

    async fn attempt(&self, url: &Url, options: &FetchOptions) -> Result<Value, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut request = self.client.request(options.method.clone(), url.clone());
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let text = response.text().await.map_err(transport)?;
        serde_json::from_str(&text).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Any HTTP answer at all counts as reachable.
    async fn probe(&self) -> bool {
        let reachable = self
            .client
            .head(&self.policy.probe_url)
            .timeout(self.policy.probe_timeout)
            .send()
            .await
            .is_ok();
        debug!(probe = %self.policy.probe_url, reachable, "connectivity probe");
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_grows_with_worst_history() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.budget_for(&[]), 10);
        assert_eq!(policy.budget_for(&[3, 7]), 12);
        assert_eq!(policy.budget_for(&[1, 2]), 10);
    }

    #[test]
    fn delay_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(4), Duration::from_secs(3));
        assert_eq!(policy.delay_after(40), Duration::from_secs(3));
    }
}
