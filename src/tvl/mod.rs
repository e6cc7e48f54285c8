use crate::config::Settings;
use crate::decimal::Decimal;
use crate::error::{Error, Result};
use crate::rpc::{self, ContractCaller, read};
use alloy::primitives::Address;
use alloy::sol;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Fixed-point decimals of the reader's USD figures.
pub const USD_DECIMALS: i32 = 18;

sol! {
    interface IContractReader {
        function vaults() external view returns (address[] vaultList);
        function totalTvlUsdc(address[] vaults) external view returns (uint256 total);
    }
}

/// Drop every vault present in `ignored`. Addresses are compared as bytes,
/// so hex case in the configured deny-list does not matter.
pub fn filter_vaults(vaults: Vec<Address>, ignored: &HashSet<Address>) -> Vec<Address> {
    vaults.into_iter().filter(|v| !ignored.contains(v)).collect()
}

/// Sum the USD value of every tracked vault across `readers` (network -> reader
/// contract), in human units. Any single network failing fails the whole run.
pub async fn aggregate(
    caller: &dyn ContractCaller,
    settings: &Settings,
    readers: &BTreeMap<String, Address>,
    ignored: &HashSet<Address>,
) -> Result<Decimal> {
    let mut total = Decimal::ZERO;

    for (network, reader) in readers {
        let endpoint = rpc::resolve(settings, network)?;

        let vaults = read(caller, &endpoint, *reader, IContractReader::vaultsCall {})
            .await?
            .vaultList;
        let listed = vaults.len();
        let vaults = filter_vaults(vaults, ignored);

        let tvl = read(caller, &endpoint, *reader, IContractReader::totalTvlUsdcCall { vaults })
            .await?
            .total;
        let tvl = Decimal::from_base_units(tvl)
            .and_then(|tvl| tvl.checked_shift(-USD_DECIMALS))
            .ok_or_else(|| Error::quote(format!("{network} TVL out of range: {tvl}")))?;

        debug!(%network, listed, %tvl, "network TVL read");
        total = total
            .checked_add(tvl)
            .ok_or_else(|| Error::quote(format!("TVL overflow after {network}")))?;
    }

    info!(networks = readers.len(), %total, "TVL aggregated");
    Ok(total)
}
