//! Bounded range queries against the REST endpoint.
//!
//! The push channel only says "something changed"; the range endpoint is where
//! the data actually comes from:
//!
//! ```text
//! GET <base>/<resource>/live?start_datetime=<ISO8601>&end_datetime=<ISO8601>
//!   -> { "data": [Measurement], "count"?: n, "limit"?: n }
//! ```

mod mock;

pub use mock::MockRangeSource;

use crate::config::SyncConfig;
use crate::error::{ConfigError, FetchError, LimitWarning};
use crate::types::{format_timestamp, Measurement, TimeRange};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a range query needs, independent of any ambient constants.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub base_url: String,
    pub resource: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Limit assumed when the server omits one
    pub default_limit: u64,
}

impl From<&SyncConfig> for FetchConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            resource: config.resource.clone(),
            headers: config.headers.clone(),
            timeout: config.request_timeout,
            default_limit: config.default_record_limit,
        }
    }
}

/// Build the query URL for `range`.
pub fn fetch_url(config: &FetchConfig, range: &TimeRange) -> Result<Url, ConfigError> {
    let raw = format!(
        "{}/{}/live",
        config.base_url.trim_end_matches('/'),
        config.resource.trim_matches('/')
    );
    let mut url = Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.clone(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut()
        .append_pair("start_datetime", &format_timestamp(&range.start))
        .append_pair("end_datetime", &format_timestamp(&range.end));
    Ok(url)
}

/// Body of a successful range response.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeResponse {
    pub data: Vec<Measurement>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// Outcome of one range query.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    /// Records as returned, admissible or not
    pub records: Vec<Measurement>,
    /// Record count reported by the server (or counted locally)
    pub count: u64,
    /// Limit in force for the query
    pub limit: u64,
    /// The server may hold more data in the range than it returned
    pub truncated: bool,
}

impl FetchResult {
    /// Result for a locally known record set.
    pub fn from_records(records: Vec<Measurement>, limit: u64) -> Self {
        Self::from_response(
            RangeResponse {
                data: records,
                count: None,
                limit: Some(limit),
            },
            limit,
        )
    }

    pub fn from_response(response: RangeResponse, default_limit: u64) -> Self {
        let count = match response.count {
            Some(n) if n > 0 => n,
            _ => response.data.len() as u64,
        };
        let limit = response
            .limit
            .filter(|&limit| limit > 0)
            .unwrap_or(default_limit);
        Self {
            records: response.data,
            count,
            limit,
            truncated: count >= limit,
        }
    }

    pub fn warning(&self) -> Option<LimitWarning> {
        self.truncated.then_some(LimitWarning {
            count: self.count,
            limit: self.limit,
        })
    }
}

/// Anything that can answer a range query.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn fetch(&self, range: TimeRange) -> Result<FetchResult, FetchError>;
}

/// Range source backed by the REST endpoint.
#[derive(Debug, Clone)]
pub struct RangeFetcher {
    config: FetchConfig,
    client: reqwest::Client,
}

impl RangeFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, ConfigError> {
        Url::parse(&config.base_url).map_err(|e| ConfigError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl RangeSource for RangeFetcher {
    async fn fetch(&self, range: TimeRange) -> Result<FetchResult, FetchError> {
        let url = fetch_url(&self.config, &range).map_err(|e| FetchError::Transport(e.to_string()))?;
        debug!(%range, "Fetching range");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let parsed: RangeResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        let result = FetchResult::from_response(parsed, self.config.default_limit);
        debug!(
            count = result.count,
            limit = result.limit,
            "Range fetched"
        );
        if let Some(warning) = result.warning() {
            warn!("{warning}");
        }
        Ok(result)
    }
}
