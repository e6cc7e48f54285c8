use crate::error::{Error, Result};
use crate::types::{
    ActivityKind, AgentConfig, BatchSwapRequest, MetricConfig, QuoteRequest, RouterSwapRequest,
};
use alloy::primitives::{Address, B256, U256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const RPC_URL_SUFFIX: &str = "_RPC_URL";
const DEFAULT_DECIMALS: u8 = 18;

/// Process-wide settings, read once at startup and never mutated.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Network id (lower-case) -> RPC URL, possibly with userinfo credentials.
    pub rpc_urls: HashMap<String, String>,
    pub group_ids: Vec<String>,
    pub verbose: bool,
    pub agents_path: PathBuf,
}

impl Settings {
    /// Collect settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// `<NETWORK>_RPC_URL` entries become endpoints; `GUILD_IDS` (comma separated)
    /// or `GUILD_ID` name the display groups; `VERBOSE` and `AGENTS_JSON` are optional.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let rpc_urls = vars
            .iter()
            .filter_map(|(key, value)| {
                let network = key.strip_suffix(RPC_URL_SUFFIX)?;
                if network.is_empty() || value.trim().is_empty() {
                    return None;
                }
                Some((network.to_lowercase(), value.trim().to_string()))
            })
            .collect();

        let group_ids = vars
            .get("GUILD_IDS")
            .or_else(|| vars.get("GUILD_ID"))
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let verbose = vars
            .get("VERBOSE")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let agents_path = vars
            .get("AGENTS_JSON")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("agents.json"));

        Self {
            rpc_urls,
            group_ids,
            verbose,
            agents_path,
        }
    }
}

/// Format of each agent entry in agents.json (camelCase).
#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentEntry {
    kind: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    interval_secs: u64,
    key_env: String,
    label: Option<String>,
    #[serde(default)]
    activity: ActivityKind,
    feed_url: Option<String>,
    pointer: Option<String>,
    price_pointer: Option<String>,
    change_pointer: Option<String>,
    #[serde(default)]
    readers: BTreeMap<String, String>,
    #[serde(default)]
    ignored_vaults: Vec<String>,
    network: Option<String>,
    pool_id: Option<String>,
    router: Option<String>,
    pair: Option<String>,
    fee: Option<u64>,
    input_token: Option<String>,
    output_token: Option<String>,
    /// Input amount in base units, as a decimal string.
    amount: Option<String>,
    decimals: Option<u8>,
}

fn enabled_by_default() -> bool {
    true
}

/// Root format of agents.json: { "agents": { "name": {...} } }
#[derive(serde::Deserialize)]
struct AgentsFile {
    agents: BTreeMap<String, AgentEntry>,
}

/// Parse agents.json. Disabled agents are dropped; an entry that fails to
/// convert is returned as an error in its slot so only that agent is lost.
pub fn load_agents_file(path: &std::path::Path) -> eyre::Result<Vec<(String, Result<AgentConfig>)>> {
    let content = fs::read_to_string(path)?;
    parse_agents(&content)
}

pub fn parse_agents(content: &str) -> eyre::Result<Vec<(String, Result<AgentConfig>)>> {
    let file: AgentsFile = serde_json::from_str(content)?;
    Ok(file
        .agents
        .into_iter()
        .filter(|(_, entry)| entry.enabled)
        .map(|(name, entry)| {
            let config = agent_config(&name, entry);
            (name, config)
        })
        .collect())
}

fn required<'a>(agent: &str, field: &str, value: &'a Option<String>) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| Error::Configuration(format!("agent {agent}: missing `{field}`")))
}

fn parse_address(agent: &str, field: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse()
        .map_err(|e| Error::Configuration(format!("agent {agent}: bad `{field}` {raw}: {e}")))
}

fn unit_amount(agent: &str, entry: &AgentEntry, decimals: u8) -> Result<U256> {
    match &entry.amount {
        Some(raw) => U256::from_str_radix(raw.trim(), 10)
            .map_err(|e| Error::Configuration(format!("agent {agent}: bad `amount` {raw}: {e}"))),
        None => Ok(U256::from(10u8).pow(U256::from(decimals))),
    }
}

fn agent_config(name: &str, entry: AgentEntry) -> Result<AgentConfig> {
    let metric = match entry.kind.as_str() {
        "price" => MetricConfig::Price {
            feed_url: required(name, "feedUrl", &entry.feed_url)?.to_string(),
            price_pointer: required(name, "pricePointer", &entry.price_pointer)?.to_string(),
            change_pointer: required(name, "changePointer", &entry.change_pointer)?.to_string(),
        },
        "circulatingSupply" => MetricConfig::CirculatingSupply {
            feed_url: required(name, "feedUrl", &entry.feed_url)?.to_string(),
            pointer: entry.pointer.clone().unwrap_or_default(),
        },
        "feedTvl" => MetricConfig::FeedTvl {
            feed_url: required(name, "feedUrl", &entry.feed_url)?.to_string(),
            pointer: entry.pointer.clone().unwrap_or_default(),
        },
        "onchainTvl" => {
            if entry.readers.is_empty() {
                return Err(Error::Configuration(format!("agent {name}: no `readers`")));
            }
            let mut readers = BTreeMap::new();
            for (network, raw) in &entry.readers {
                readers.insert(network.to_lowercase(), parse_address(name, "readers", raw)?);
            }
            let ignored_vaults = entry
                .ignored_vaults
                .iter()
                .map(|raw| parse_address(name, "ignoredVaults", raw))
                .collect::<Result<Vec<_>>>()?;
            MetricConfig::OnchainTvl {
                readers,
                ignored_vaults,
            }
        }
        "batchSwapDiscount" => {
            let decimals = entry.decimals.unwrap_or(DEFAULT_DECIMALS);
            let pool_id: B256 = required(name, "poolId", &entry.pool_id)?
                .trim()
                .parse()
                .map_err(|e| Error::Configuration(format!("agent {name}: bad `poolId`: {e}")))?;
            MetricConfig::Discount {
                network: required(name, "network", &entry.network)?.to_lowercase(),
                request: QuoteRequest::BatchSwap(BatchSwapRequest {
                    pool_id,
                    input_token: parse_address(name, "inputToken", required(name, "inputToken", &entry.input_token)?)?,
                    output_token: parse_address(name, "outputToken", required(name, "outputToken", &entry.output_token)?)?,
                    input_amount: unit_amount(name, &entry, decimals)?,
                }),
                decimals,
            }
        }
        "routerSwapDiscount" => {
            let decimals = entry.decimals.unwrap_or(DEFAULT_DECIMALS);
            let fee = entry
                .fee
                .ok_or_else(|| Error::Configuration(format!("agent {name}: missing `fee`")))?;
            MetricConfig::Discount {
                network: required(name, "network", &entry.network)?.to_lowercase(),
                request: QuoteRequest::RouterSwap(RouterSwapRequest {
                    router: parse_address(name, "router", required(name, "router", &entry.router)?)?,
                    pair: parse_address(name, "pair", required(name, "pair", &entry.pair)?)?,
                    fee: U256::from(fee),
                    input_token: parse_address(name, "inputToken", required(name, "inputToken", &entry.input_token)?)?,
                    output_token: parse_address(name, "outputToken", required(name, "outputToken", &entry.output_token)?)?,
                    input_amount: unit_amount(name, &entry, decimals)?,
                }),
                decimals,
            }
        }
        other => {
            return Err(Error::Configuration(format!("agent {name}: unknown kind `{other}`")));
        }
    };

    if entry.interval_secs == 0 {
        return Err(Error::Configuration(format!("agent {name}: `intervalSecs` must be positive")));
    }

    Ok(AgentConfig {
        name: name.to_string(),
        interval: Duration::from_secs(entry.interval_secs),
        key_env: entry.key_env,
        label: entry.label,
        activity: entry.activity,
        metric,
    })
}
