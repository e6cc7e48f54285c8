use crate::error::{MAX_TEXT_LEN, truncate};
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Resolved connection descriptor for one network's RPC endpoint.
/// Credentials from the URL userinfo are split out; `url` never carries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub network: String,
    pub url: Url,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Endpoint {
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSwapRequest {
    pub pool_id: B256,
    pub input_token: Address,
    pub output_token: Address,
    pub input_amount: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSwapRequest {
    pub router: Address,
    pub pair: Address,
    pub fee: U256,
    pub input_token: Address,
    pub output_token: Address,
    pub input_amount: U256,
}

/// One variant per quote provider. Amounts are in the input token's base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteRequest {
    BatchSwap(BatchSwapRequest),
    RouterSwap(RouterSwapRequest),
}

/// A display update: optional nickname plus status text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub label: Option<String>,
    pub value: String,
    pub computed_at: DateTime<Utc>,
}

impl Metric {
    /// Builds a metric, cutting `value` to the status length limit.
    pub fn new(label: Option<String>, value: impl Into<String>) -> Self {
        Self {
            label,
            value: truncate(&value.into(), MAX_TEXT_LEN),
            computed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    #[serde(rename = "PLAYING")]
    Playing,
    #[default]
    #[serde(rename = "WATCHING")]
    Watching,
    #[serde(rename = "LISTENING")]
    Listening,
    #[serde(rename = "COMPETING")]
    Competing,
}

/// What an agent computes, with every address already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricConfig {
    Price {
        feed_url: String,
        price_pointer: String,
        change_pointer: String,
    },
    CirculatingSupply {
        feed_url: String,
        pointer: String,
    },
    FeedTvl {
        feed_url: String,
        pointer: String,
    },
    OnchainTvl {
        readers: BTreeMap<String, Address>,
        ignored_vaults: Vec<Address>,
    },
    Discount {
        network: String,
        request: QuoteRequest,
        decimals: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub name: String,
    pub interval: Duration,
    pub key_env: String,
    pub label: Option<String>,
    pub activity: ActivityKind,
    pub metric: MetricConfig,
}
