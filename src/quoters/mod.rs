use crate::error::{Error, Result};
use crate::rpc::{ContractCaller, read};
use crate::types::{BatchSwapRequest, Endpoint, QuoteRequest, RouterSwapRequest};
use alloy::primitives::{Address, Bytes, U256, address};
use alloy::sol;
use std::sync::Arc;
use tracing::debug;

/// Balancer V2 vault, deployed at the same address on every supported chain.
pub const BALANCER_VAULT: Address = address!("BA12222222228d8Ba445958a75a0704d566BF2C8");

/// `SwapKind.GIVEN_IN`
const GIVEN_IN: u8 = 0;

sol! {
    interface IBalancerVault {
        struct BatchSwapStep {
            bytes32 poolId;
            uint256 assetInIndex;
            uint256 assetOutIndex;
            uint256 amount;
            bytes userData;
        }

        struct FundManagement {
            address sender;
            bool fromInternalBalance;
            address recipient;
            bool toInternalBalance;
        }

        function queryBatchSwap(
            uint8 kind,
            BatchSwapStep[] swaps,
            address[] assets,
            FundManagement funds
        ) external returns (int256[] assetDeltas);
    }

    interface IPair {
        // uint112 on-chain; each still occupies one ABI word.
        function getReserves() external view returns (uint256 reserve0, uint256 reserve1, uint32 blockTimestampLast);
    }

    interface IRouter {
        function getAmountOut(uint256 amountIn, uint256 reserveIn, uint256 reserveOut, uint256 fee)
            external view returns (uint256 amountOut);
    }
}

/// Which pair reserve backs `input` and which backs `output`.
/// Pairs store the numerically smaller token address as reserve zero.
pub fn order_reserves(input: Address, output: Address, reserve0: U256, reserve1: U256) -> (U256, U256) {
    if input < output {
        (reserve0, reserve1)
    } else {
        (reserve1, reserve0)
    }
}

/// Turns a [`QuoteRequest`] into an output amount in the output token's base units.
#[derive(Clone)]
pub struct Quoter {
    caller: Arc<dyn ContractCaller>,
}

impl Quoter {
    pub fn new(caller: Arc<dyn ContractCaller>) -> Self {
        Self { caller }
    }

    pub async fn quote(&self, endpoint: &Endpoint, request: &QuoteRequest) -> Result<U256> {
        match request {
            QuoteRequest::BatchSwap(req) => self.batch_swap(endpoint, req).await,
            QuoteRequest::RouterSwap(req) => self.router_swap(endpoint, req).await,
        }
    }

    /// Simulate a single-step GIVEN_IN batch swap on the vault. The output
    /// asset's delta is negative (it leaves the vault); only its size is kept.
    async fn batch_swap(&self, endpoint: &Endpoint, req: &BatchSwapRequest) -> Result<U256> {
        let call = IBalancerVault::queryBatchSwapCall {
            kind: GIVEN_IN,
            swaps: vec![IBalancerVault::BatchSwapStep {
                poolId: req.pool_id,
                assetInIndex: U256::ZERO,
                assetOutIndex: U256::from(1),
                amount: req.input_amount,
                userData: Bytes::new(),
            }],
            assets: vec![req.input_token, req.output_token],
            funds: IBalancerVault::FundManagement {
                sender: Address::ZERO,
                fromInternalBalance: false,
                recipient: Address::ZERO,
                toInternalBalance: false,
            },
        };

        let deltas = read(self.caller.as_ref(), endpoint, BALANCER_VAULT, call)
            .await?
            .assetDeltas;
        let out = deltas
            .get(1)
            .ok_or_else(|| Error::quote(format!("queryBatchSwap returned {} deltas", deltas.len())))?;

        debug!(network = %endpoint.network, pool = %req.pool_id, delta = %out, "batch swap quoted");
        Ok(out.unsigned_abs())
    }

    async fn router_swap(&self, endpoint: &Endpoint, req: &RouterSwapRequest) -> Result<U256> {
        let reserves = read(self.caller.as_ref(), endpoint, req.pair, IPair::getReservesCall {}).await?;
        let (reserve_in, reserve_out) =
            order_reserves(req.input_token, req.output_token, reserves.reserve0, reserves.reserve1);

        let out = read(
            self.caller.as_ref(),
            endpoint,
            req.router,
            IRouter::getAmountOutCall {
                amountIn: req.input_amount,
                reserveIn: reserve_in,
                reserveOut: reserve_out,
                fee: req.fee,
            },
        )
        .await?
        .amountOut;

        debug!(network = %endpoint.network, pair = %req.pair, %out, "router swap quoted");
        Ok(out)
    }
}
