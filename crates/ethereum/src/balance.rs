use alloy::primitives::utils::{format_units, parse_units};
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use crate::contracts::IERC20;
use crate::networks::EthereumNetwork;

/// Balance in smallest units together with its display form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub raw: U256,
    pub decimals: u8,
    pub formatted: String,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self {
            raw,
            decimals,
            formatted: format_amount(raw, decimals),
        }
    }

    /// Placeholder shown when a balance could not be read
    pub fn zero(decimals: u8) -> Self {
        Self::new(U256::ZERO, decimals)
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }
}

/// Format smallest units as a decimal string, trimming trailing zeros
pub fn format_amount(raw: U256, decimals: u8) -> String {
    let formatted = match format_units(raw, decimals) {
        Ok(s) => s,
        Err(_) => return raw.to_string(),
    };
    if !formatted.contains('.') {
        return formatted;
    }
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
}

/// Parse a decimal string ("1.5") into smallest units
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256> {
    let parsed = parse_units(amount.trim(), decimals)
        .map_err(|e| anyhow!("Invalid amount {}: {}", amount, e))?;
    Ok(parsed.get_absolute())
}

/// Get balance in wei for an address on a specific network
pub async fn get_balance_wei(address: &str, network: &str) -> Result<U256> {
    let network_config = EthereumNetwork::get_network(network)
        .ok_or_else(|| anyhow!("Unsupported network: {}", network))?;

    if network_config.rpc_endpoints.is_empty() {
        return Err(anyhow!("No RPC endpoints configured for network: {}", network));
    }

    let addr: Address = address.parse()
        .map_err(|e| anyhow!("Invalid Ethereum address {}: {}", address, e))?;

    // Try each endpoint until one succeeds
    let mut last_error = None;
    for endpoint in &network_config.rpc_endpoints {
        match fetch_balance_from_endpoint(addr, endpoint).await {
            Ok(balance) => return Ok(balance),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("Failed to fetch balance")))
}

async fn fetch_balance_from_endpoint(address: Address, endpoint: &str) -> Result<U256> {
    let provider = ProviderBuilder::new()
        .connect_http(endpoint.parse()?);

    let balance = provider.get_balance(address)
        .await
        .map_err(|e| anyhow!("Failed to fetch balance from {}: {}", endpoint, e))?;

    Ok(balance)
}

/// Get the ERC20 balance of `owner` for `token` on a network, adjusted for the token's decimals
pub async fn get_token_balance(owner: &str, token: &str, network: &str) -> Result<TokenAmount> {
    let network_config = EthereumNetwork::get_network(network)
        .ok_or_else(|| anyhow!("Unsupported network: {}", network))?;

    let owner: Address = owner.parse()
        .map_err(|e| anyhow!("Invalid Ethereum address {}: {}", owner, e))?;
    let token: Address = token.parse()
        .map_err(|e| anyhow!("Invalid token address {}: {}", token, e))?;

    let mut last_error = None;
    for endpoint in &network_config.rpc_endpoints {
        match fetch_token_balance_from_endpoint(owner, token, endpoint).await {
            Ok(amount) => return Ok(amount),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("Failed to fetch token balance")))
}

async fn fetch_token_balance_from_endpoint(
    owner: Address,
    token: Address,
    endpoint: &str,
) -> Result<TokenAmount> {
    let provider = ProviderBuilder::new()
        .connect_http(endpoint.parse()?);
    let erc20 = IERC20::new(token, &provider);

    // Balance and decimals in parallel
    let (raw, decimals) = tokio::try_join!(
        async { erc20.balanceOf(owner).call().await },
        async { erc20.decimals().call().await },
    )
    .map_err(|e| anyhow!("Failed to read token {} from {}: {}", token, endpoint, e))?;

    Ok(TokenAmount::new(raw, decimals))
}

/// Get account information (balance and nonce)
pub async fn get_account_info(address: &str, network: &str) -> Result<AccountInfo> {
    let network_config = EthereumNetwork::get_network(network)
        .ok_or_else(|| anyhow!("Unsupported network: {}", network))?;

    let addr: Address = address.parse()
        .map_err(|e| anyhow!("Invalid Ethereum address {}: {}", address, e))?;

    let mut last_error = None;
    for endpoint in &network_config.rpc_endpoints {
        match fetch_account_info_from_endpoint(addr, endpoint, network_config).await {
            Ok(info) => return Ok(info),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("Failed to fetch account info")))
}

async fn fetch_account_info_from_endpoint(
    address: Address,
    endpoint: &str,
    network: &EthereumNetwork,
) -> Result<AccountInfo> {
    let provider = ProviderBuilder::new()
        .connect_http(endpoint.parse()?);

    let (balance, nonce) = tokio::try_join!(
        provider.get_balance(address),
        provider.get_transaction_count(address)
    ).map_err(|e| anyhow!("Failed to fetch account data: {}", e))?;

    Ok(AccountInfo {
        address: format!("{:?}", address),
        balance: TokenAmount::new(balance, network.native_currency.decimals),
        nonce,
        network: network.name.clone(),
        symbol: network.native_currency.symbol.clone(),
    })
}

#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub address: String,
    pub balance: TokenAmount,
    pub nonce: u64,
    pub network: String,
    pub symbol: String,
}
