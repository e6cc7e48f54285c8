use crate::config::Settings;
use crate::decimal::Decimal;
use crate::error::{Error, Result};
use crate::feeds::{self, FeedClient};
use crate::quoters::Quoter;
use crate::rpc::{self, ContractCaller};
use crate::tvl;
use crate::types::{AgentConfig, Metric, MetricConfig, QuoteRequest};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const SUPPLY_LABEL: &str = "Circulating Supply";
pub const TVL_LABEL: &str = "TVL";
pub const DISCOUNT_LABEL: &str = "Discount";

/// Produces a fresh [`Metric`] each polling cycle.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn compute(&self) -> Result<Metric>;
}

/// Nickname `$0.0123`, status `24h: +1.23%`.
pub fn price_metric(price: Decimal, change_24h: Decimal) -> Metric {
    let change = change_24h.round(2);
    let sign = if change.is_negative() { "" } else { "+" };
    Metric::new(
        Some(format!("${}", price.to_fixed(4))),
        format!("24h: {sign}{}%", change.to_fixed(2)),
    )
}

pub fn supply_metric(label: Option<&str>, supply: Decimal) -> Metric {
    Metric::new(
        Some(label.unwrap_or(SUPPLY_LABEL).to_string()),
        supply.to_grouped(2),
    )
}

/// `total` is already in human units (USD).
pub fn tvl_metric(label: Option<&str>, total: Decimal) -> Metric {
    Metric::new(
        Some(label.unwrap_or(TVL_LABEL).to_string()),
        format!("${}", total.to_grouped(0)),
    )
}

/// `1 - quoted` as a percentage, truncated to one decimal. `quoted` is the
/// output for exactly one unit of input, in base units with `decimals`.
pub fn discount_percent(quoted: U256, decimals: u8) -> Result<String> {
    let out_of_range = || Error::quote(format!("quote out of range: {quoted}"));
    let quoted = Decimal::from_base_units(quoted)
        .and_then(|q| q.checked_shift(-i32::from(decimals)))
        .ok_or_else(out_of_range)?;
    let percent = Decimal::ONE
        .checked_sub(quoted)
        .and_then(|discount| discount.checked_mul(Decimal::from_i64(100)))
        .ok_or_else(out_of_range)?;
    Ok(format!("{}%", percent.trunc(1).to_fixed(1)))
}

pub fn discount_metric(label: Option<&str>, quoted: U256, decimals: u8) -> Result<Metric> {
    Ok(Metric::new(
        Some(label.unwrap_or(DISCOUNT_LABEL).to_string()),
        discount_percent(quoted, decimals)?,
    ))
}

pub struct PriceSource {
    feeds: FeedClient,
    url: String,
    price_pointer: String,
    change_pointer: String,
}

#[async_trait]
impl MetricSource for PriceSource {
    async fn compute(&self) -> Result<Metric> {
        let payload = self.feeds.fetch(&self.url).await?;
        let price = feeds::decimal_at(&payload, &self.price_pointer)?;
        let change = feeds::decimal_at(&payload, &self.change_pointer)?;
        Ok(price_metric(price, change))
    }
}

pub struct SupplySource {
    feeds: FeedClient,
    url: String,
    pointer: String,
    label: Option<String>,
}

#[async_trait]
impl MetricSource for SupplySource {
    async fn compute(&self) -> Result<Metric> {
        let payload = self.feeds.fetch(&self.url).await?;
        let supply = feeds::decimal_at(&payload, &self.pointer)?;
        Ok(supply_metric(self.label.as_deref(), supply))
    }
}

pub struct FeedTvlSource {
    feeds: FeedClient,
    url: String,
    pointer: String,
    label: Option<String>,
}

#[async_trait]
impl MetricSource for FeedTvlSource {
    async fn compute(&self) -> Result<Metric> {
        let payload = self.feeds.fetch(&self.url).await?;
        let total = feeds::sum_at(&payload, &self.pointer)?;
        Ok(tvl_metric(self.label.as_deref(), total))
    }
}

pub struct OnchainTvlSource {
    caller: Arc<dyn ContractCaller>,
    settings: Arc<Settings>,
    readers: BTreeMap<String, Address>,
    ignored: HashSet<Address>,
    label: Option<String>,
}

#[async_trait]
impl MetricSource for OnchainTvlSource {
    async fn compute(&self) -> Result<Metric> {
        let total = tvl::aggregate(self.caller.as_ref(), &self.settings, &self.readers, &self.ignored).await?;
        Ok(tvl_metric(self.label.as_deref(), total))
    }
}

pub struct DiscountSource {
    quoter: Quoter,
    settings: Arc<Settings>,
    network: String,
    request: QuoteRequest,
    decimals: u8,
    label: Option<String>,
}

#[async_trait]
impl MetricSource for DiscountSource {
    async fn compute(&self) -> Result<Metric> {
        let endpoint = rpc::resolve(&self.settings, &self.network)?;
        let quoted = self.quoter.quote(&endpoint, &self.request).await?;
        discount_metric(self.label.as_deref(), quoted, self.decimals)
    }
}

/// Build the metric source an agent's configuration asks for.
pub fn source_for(
    config: &AgentConfig,
    settings: Arc<Settings>,
    caller: Arc<dyn ContractCaller>,
    feeds: FeedClient,
) -> Box<dyn MetricSource> {
    let label = config.label.clone();
    match &config.metric {
        MetricConfig::Price {
            feed_url,
            price_pointer,
            change_pointer,
        } => Box::new(PriceSource {
            feeds,
            url: feed_url.clone(),
            price_pointer: price_pointer.clone(),
            change_pointer: change_pointer.clone(),
        }),
        MetricConfig::CirculatingSupply { feed_url, pointer } => Box::new(SupplySource {
            feeds,
            url: feed_url.clone(),
            pointer: pointer.clone(),
            label,
        }),
        MetricConfig::FeedTvl { feed_url, pointer } => Box::new(FeedTvlSource {
            feeds,
            url: feed_url.clone(),
            pointer: pointer.clone(),
            label,
        }),
        MetricConfig::OnchainTvl {
            readers,
            ignored_vaults,
        } => Box::new(OnchainTvlSource {
            caller,
            settings,
            readers: readers.clone(),
            ignored: ignored_vaults.iter().copied().collect(),
            label,
        }),
        MetricConfig::Discount {
            network,
            request,
            decimals,
        } => Box::new(DiscountSource {
            quoter: Quoter::new(caller),
            settings,
            network: network.clone(),
            request: request.clone(),
            decimals: *decimals,
            label,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quoters::tests::MockChain;
    use crate::types::{ActivityKind, BatchSwapRequest};
    use alloy::primitives::{B256, I256};
    use std::time::Duration;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_supply_metric_scenario() {
        let metric = supply_metric(None, d("123456789.5"));
        assert_eq!(metric.label.as_deref(), Some("Circulating Supply"));
        assert_eq!(metric.value, "123,456,789.50");
    }

    #[test]
    fn test_discount_of_095_quote() {
        let quoted = U256::from(950_000_000_000_000_000u64);
        assert_eq!(discount_percent(quoted, 18).unwrap(), "5.0%");
    }

    #[test]
    fn test_discount_truncates_and_handles_premium() {
        // 1 - 0.9488 = 0.0512 -> 5.12% -> 5.1%
        assert_eq!(discount_percent(U256::from(948_800u64), 6).unwrap(), "5.1%");
        // 1 - 0.9401 = 5.99% truncates, does not round up
        assert_eq!(discount_percent(U256::from(940_100u64), 6).unwrap(), "5.9%");
        assert_eq!(discount_percent(U256::from(1_030_000u64), 6).unwrap(), "-3.0%");
    }

    #[test]
    fn test_discount_of_unrepresentable_quote_is_error() {
        assert!(matches!(discount_percent(U256::MAX, 18), Err(Error::Quote(_))));
        let huge = U256::from(10u8).pow(U256::from(76));
        assert!(matches!(discount_percent(huge, 0), Err(Error::Quote(_))));
    }

    #[test]
    fn test_price_metric() {
        let metric = price_metric(d("0.0123456"), d("2.345"));
        assert_eq!(metric.label.as_deref(), Some("$0.0123"));
        assert_eq!(metric.value, "24h: +2.35%");
        let metric = price_metric(d("1.5"), d("-0.5"));
        assert_eq!(metric.value, "24h: -0.50%");
    }

    #[test]
    fn test_price_change_rounding_to_zero_keeps_plus_sign() {
        assert_eq!(price_metric(d("1"), d("-0.001")).value, "24h: +0.00%");
        assert_eq!(price_metric(d("1"), d("-0.005")).value, "24h: -0.01%");
    }

    #[test]
    fn test_tvl_metric() {
        let metric = tvl_metric(Some("Tetu TVL"), d("4001250.75"));
        assert_eq!(metric.label.as_deref(), Some("Tetu TVL"));
        assert_eq!(metric.value, "$4,001,251");
    }

    #[tokio::test]
    async fn test_discount_source_end_to_end() {
        let mut chain = MockChain::new();
        chain.deltas = vec![I256::ONE, -I256::try_from(950_000_000_000_000_000i64).unwrap()];
        let settings = Arc::new(Settings::from_vars(vec![(
            "POLYGON_RPC_URL".to_string(),
            "https://rpc.example.com".to_string(),
        )]));
        let config = AgentConfig {
            name: "tetubal".to_string(),
            interval: Duration::from_secs(60),
            key_env: "KEY".to_string(),
            label: Some("tetuBAL discount".to_string()),
            activity: ActivityKind::Watching,
            metric: MetricConfig::Discount {
                network: "polygon".to_string(),
                request: QuoteRequest::BatchSwap(BatchSwapRequest {
                    pool_id: B256::ZERO,
                    input_token: Address::repeat_byte(1),
                    output_token: Address::repeat_byte(2),
                    input_amount: U256::from(10u8).pow(U256::from(18)),
                }),
                decimals: 18,
            },
        };

        let source = source_for(&config, settings, Arc::new(chain), FeedClient::new());
        let metric = source.compute().await.unwrap();
        assert_eq!(metric.label.as_deref(), Some("tetuBAL discount"));
        assert_eq!(metric.value, "5.0%");
    }

    #[tokio::test]
    async fn test_discount_source_without_endpoint() {
        let config = AgentConfig {
            name: "router".to_string(),
            interval: Duration::from_secs(60),
            key_env: "KEY".to_string(),
            label: None,
            activity: ActivityKind::Watching,
            metric: MetricConfig::Discount {
                network: "bsc".to_string(),
                request: QuoteRequest::BatchSwap(BatchSwapRequest {
                    pool_id: B256::ZERO,
                    input_token: Address::ZERO,
                    output_token: Address::ZERO,
                    input_amount: U256::ZERO,
                }),
                decimals: 18,
            },
        };
        let source = source_for(
            &config,
            Arc::new(Settings::default()),
            Arc::new(MockChain::new()),
            FeedClient::new(),
        );
        assert!(matches!(source.compute().await, Err(Error::Configuration(_))));
    }
}
