use crate::decimal::Decimal;
use crate::error::{Error, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// Plain GET-and-parse client for JSON price, supply and TVL feeds.
#[derive(Clone)]
pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<Value> {
        debug!(%url, "fetching feed");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

impl Default for FeedClient {
    fn default() -> Self {
        Self::new()
    }
}

fn at<'a>(payload: &'a Value, pointer: &str) -> Result<&'a Value> {
    payload
        .pointer(pointer)
        .ok_or_else(|| Error::Feed(format!("feed payload has no value at `{pointer}`")))
}

/// Read a number (or numeric string) at a JSON pointer; `""` is the whole payload.
pub fn decimal_at(payload: &Value, pointer: &str) -> Result<Decimal> {
    to_decimal(at(payload, pointer)?)
}

/// Sum every value of the object (or array) at `pointer`, e.g. a per-network TVL map.
pub fn sum_at(payload: &Value, pointer: &str) -> Result<Decimal> {
    let values: Vec<&Value> = match at(payload, pointer)? {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        other => return Err(Error::Feed(format!("expected a map at `{pointer}`, got {other}"))),
    };
    let mut total = Decimal::ZERO;
    for value in values {
        total = total
            .checked_add(to_decimal(value)?)
            .ok_or_else(|| Error::Feed(format!("sum at `{pointer}` overflows")))?;
    }
    Ok(total)
}

fn to_decimal(value: &Value) -> Result<Decimal> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(Error::Feed(format!("expected a number, got {other}"))),
    };
    raw.parse().map_err(|e| Error::Feed(format!("{e}")))
}
