use crate::config::Settings;
use crate::error::{Error, Result};
use crate::types::Endpoint;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use alloy::transports::Authorization;
use alloy::transports::http::Http;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::debug;
use url::Url;

/// Look up the endpoint for `network`, splitting any `user:password@`
/// userinfo out of the URL. Re-parsed on every call; nothing is cached.
pub fn resolve(settings: &Settings, network: &str) -> Result<Endpoint> {
    let raw = settings
        .rpc_urls
        .get(&network.to_lowercase())
        .ok_or_else(|| Error::Configuration(format!("no RPC endpoint configured for {network}")))?;

    let mut url = Url::parse(raw)
        .map_err(|e| Error::Configuration(format!("invalid RPC URL for {network}: {e}")))?;

    let user = Some(url.username().to_string()).filter(|u| !u.is_empty());
    let password = url.password().map(String::from);
    if user.is_some() || password.is_some() {
        url.set_username("")
            .and_then(|_| url.set_password(None))
            .map_err(|_| Error::Configuration(format!("cannot strip credentials from {network} URL")))?;
    }

    Ok(Endpoint {
        network: network.to_lowercase(),
        url,
        user,
        password,
    })
}

/// Read-only `eth_call` against a contract. Implementations never broadcast.
#[async_trait]
pub trait ContractCaller: Send + Sync {
    async fn call(&self, endpoint: &Endpoint, to: Address, input: Bytes) -> Result<Bytes>;
}

/// Encode `call`, run it through `caller` and decode the return values.
/// Every failure surfaces as a quote error.
pub async fn read<C>(caller: &dyn ContractCaller, endpoint: &Endpoint, to: Address, call: C) -> Result<C::Return>
where
    C: SolCall + Send,
{
    let input = Bytes::from(call.abi_encode());
    let output = caller.call(endpoint, to, input).await?;
    C::abi_decode_returns(&output, true).map_err(|e| Error::quote(format!("{}: {e}", C::SIGNATURE)))
}

/// Basic-auth header value for `endpoint`, if it carries any credentials.
/// A password without a user is sent with an empty user name.
pub fn basic_auth(endpoint: &Endpoint) -> Option<Authorization> {
    if endpoint.user.is_none() && endpoint.password.is_none() {
        return None;
    }
    Some(Authorization::basic(
        endpoint.user.as_deref().unwrap_or_default(),
        endpoint.password.as_deref().unwrap_or_default(),
    ))
}

/// `eth_call` through an alloy HTTP provider. Credentials travel as a basic
/// auth header, never in the URL.
pub struct HttpCaller {
    client: Client,
}

impl HttpCaller {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn client_for(&self, endpoint: &Endpoint) -> Result<Client> {
        let Some(auth) = basic_auth(endpoint) else {
            return Ok(self.client.clone());
        };
        let mut value = HeaderValue::from_str(&auth.to_string())
            .map_err(|e| Error::Configuration(format!("invalid credentials for {}: {e}", endpoint.network)))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Client::builder().default_headers(headers).build().map_err(Error::quote)
    }
}

impl Default for HttpCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContractCaller for HttpCaller {
    async fn call(&self, endpoint: &Endpoint, to: Address, input: Bytes) -> Result<Bytes> {
        debug!(network = %endpoint.network, origin = %endpoint.origin(), %to, "eth_call");

        let http = Http::with_client(self.client_for(endpoint)?, endpoint.url.clone());
        let provider = ProviderBuilder::new().on_client(RpcClient::new(http, false));

        let tx = TransactionRequest::default().to(to).input(input.into());
        provider.call(&tx).await.map_err(Error::quote)
    }
}
