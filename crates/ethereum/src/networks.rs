use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use once_cell::sync::Lazy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumNetwork {
    pub name: String,
    pub chain_id: u64,
    pub rpc_endpoints: Vec<String>,
    pub explorer: Option<String>,
    pub native_currency: NativeCurrency,
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl EthereumNetwork {
    pub fn get_network(name: &str) -> Option<&'static EthereumNetwork> {
        NETWORKS.get(name)
    }

    pub fn list_networks() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = NETWORKS.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// First configured endpoint, used when no explicit RPC URL is given
    pub fn primary_endpoint(&self) -> Option<&str> {
        self.rpc_endpoints.first().map(|s| s.as_str())
    }

    /// Explorer link for a transaction hash, if the network has an explorer
    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.explorer
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_hash))
    }
}

/// Resolve the RPC URL: an explicit URL wins, otherwise the network's primary endpoint
pub fn resolve_rpc_url(rpc_url: Option<String>, network: &str) -> anyhow::Result<String> {
    if let Some(url) = rpc_url.filter(|u| !u.is_empty()) {
        return Ok(url);
    }
    let config = EthereumNetwork::get_network(network)
        .ok_or_else(|| anyhow::anyhow!("Unsupported network: {}", network))?;
    config
        .primary_endpoint()
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("No RPC endpoints configured for network: {}", network))
}

fn network(
    name: &str,
    chain_id: u64,
    rpc_endpoints: &[&str],
    explorer: Option<&str>,
    currency: (&str, &str),
    testnet: bool,
) -> EthereumNetwork {
    EthereumNetwork {
        name: name.to_string(),
        chain_id,
        rpc_endpoints: rpc_endpoints.iter().map(|s| s.to_string()).collect(),
        explorer: explorer.map(|s| s.to_string()),
        native_currency: NativeCurrency {
            name: currency.0.to_string(),
            symbol: currency.1.to_string(),
            decimals: 18,
        },
        testnet,
    }
}

static NETWORKS: Lazy<HashMap<String, EthereumNetwork>> = Lazy::new(|| {
    let mut networks = HashMap::new();

    networks.insert("mainnet".to_string(), network(
        "Ethereum Mainnet",
        1,
        &["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"],
        Some("https://etherscan.io"),
        ("Ether", "ETH"),
        false,
    ));

    networks.insert("sepolia".to_string(), network(
        "Sepolia Testnet",
        11155111,
        &["https://rpc.sepolia.org", "https://sepolia.drpc.org"],
        Some("https://sepolia.etherscan.io"),
        ("Sepolia Ether", "ETH"),
        true,
    ));

    // The marketplace settles channel purchases on Polygon
    networks.insert("polygon".to_string(), network(
        "Polygon",
        137,
        &["https://polygon-rpc.com", "https://rpc.ankr.com/polygon"],
        Some("https://polygonscan.com"),
        ("MATIC", "MATIC"),
        false,
    ));

    networks.insert("polygon-amoy".to_string(), network(
        "Polygon Amoy",
        80002,
        &[
            "https://rpc-amoy.polygon.technology",
            "https://polygon-amoy-bor-rpc.publicnode.com",
        ],
        Some("https://amoy.polygonscan.com"),
        ("MATIC", "MATIC"),
        true,
    ));

    networks.insert("base".to_string(), network(
        "Base",
        8453,
        &["https://mainnet.base.org", "https://base.llamarpc.com"],
        Some("https://basescan.org"),
        ("Base Ether", "ETH"),
        false,
    ));

    networks.insert("base-sepolia".to_string(), network(
        "Base Sepolia",
        84532,
        &["https://sepolia.base.org"],
        Some("https://sepolia.basescan.org"),
        ("Base Sepolia Ether", "ETH"),
        true,
    ));

    // Local development (anvil / hardhat)
    networks.insert("localhost".to_string(), network(
        "Localhost",
        31337,
        &["http://127.0.0.1:8545", "http://localhost:8545"],
        None,
        ("Ether", "ETH"),
        true,
    ));

    networks
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_networks() {
        let polygon = EthereumNetwork::get_network("polygon").unwrap();
        assert_eq!(polygon.chain_id, 137);
        assert_eq!(polygon.native_currency.decimals, 18);
        assert!(EthereumNetwork::get_network("unknown").is_none());
        assert!(EthereumNetwork::list_networks().contains(&"localhost"));
    }

    #[test]
    fn test_resolve_rpc_url() {
        let explicit = resolve_rpc_url(Some("http://node:8545".to_string()), "unknown").unwrap();
        assert_eq!(explicit, "http://node:8545");

        let fallback = resolve_rpc_url(None, "localhost").unwrap();
        assert_eq!(fallback, "http://127.0.0.1:8545");

        assert!(resolve_rpc_url(Some(String::new()), "nope").is_err());
    }

    #[test]
    fn test_explorer_tx_url() {
        let polygon = EthereumNetwork::get_network("polygon").unwrap();
        assert_eq!(
            polygon.explorer_tx_url("0xabc").as_deref(),
            Some("https://polygonscan.com/tx/0xabc")
        );
        let local = EthereumNetwork::get_network("localhost").unwrap();
        assert!(local.explorer_tx_url("0xabc").is_none());
    }
}
