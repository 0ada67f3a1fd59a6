use crate::calls::MarketCall;
use crate::contracts::{IChannelMarket, IERC20};
use crate::signature::SplitSignature;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

/// Configuration for the marketplace chain client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Buyer key; read-only operations work without it
    pub private_key: Option<String>,
}

/// Mined transaction status as seen by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptInfo {
    pub success: bool,
    pub block_number: Option<u64>,
    pub confirmations: u64,
}

/// Marketplace client: ERC20 reads, approvals and market contract calls
pub struct MarketplaceClient {
    pub config: ClientConfig,
    signer: Option<PrivateKeySigner>,
}

impl MarketplaceClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let signer = match config.private_key.as_deref() {
            Some(key) if !key.is_empty() => Some(
                PrivateKeySigner::from_str(key)
                    .map_err(|e| anyhow!("Invalid private key: {}", e))?,
            ),
            _ => None,
        };

        Ok(Self { config, signer })
    }

    /// Address of the configured signer, if any
    pub fn address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    fn read_provider(&self) -> Result<impl Provider> {
        let provider = ProviderBuilder::new()
            .connect_http(self.config.rpc_url.parse()?);
        Ok(provider)
    }

    fn signing_provider(&self) -> Result<impl Provider> {
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| anyhow!("No signer configured for transaction submission"))?;
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.config.rpc_url.parse()?);

        Ok(provider)
    }

    pub async fn native_balance(&self, owner: Address) -> Result<U256> {
        let provider = self.read_provider()?;
        let balance = provider.get_balance(owner).await?;
        Ok(balance)
    }

    pub async fn token_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let provider = self.read_provider()?;
        let erc20 = IERC20::new(token, &provider);
        let balance = erc20.balanceOf(owner).call().await?;
        Ok(balance)
    }

    pub async fn token_decimals(&self, token: Address) -> Result<u8> {
        let provider = self.read_provider()?;
        let erc20 = IERC20::new(token, &provider);
        let decimals = erc20.decimals().call().await?;
        Ok(decimals)
    }

    pub async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let provider = self.read_provider()?;
        let erc20 = IERC20::new(token, &provider);
        let allowance = erc20.allowance(owner, spender).call().await?;
        Ok(allowance)
    }

    /// Send an ERC20 approval; returns as soon as the node accepted the transaction
    pub async fn approve(&self, token: Address, spender: Address, amount: U256) -> Result<TxHash> {
        let provider = self.signing_provider()?;
        let erc20 = IERC20::new(token, &provider);

        let pending_tx = erc20.approve(spender, amount).send().await?;
        let tx_hash = *pending_tx.tx_hash();

        debug!("Approval sent: token={} spender={} tx={:?}", token, spender, tx_hash);
        Ok(tx_hash)
    }

    /// Send a marketplace contract call with `value` attached; does not wait for mining
    pub async fn send_market_call(
        &self,
        contract: Address,
        call: &MarketCall,
        signature: Option<&SplitSignature>,
        value: U256,
    ) -> Result<TxHash> {
        let provider = self.signing_provider()?;
        let market = IChannelMarket::new(contract, &provider);

        let pending_tx = match call {
            MarketCall::JoinChannel { channel_id, price } => {
                market
                    .joinChannel(*channel_id, *price)
                    .value(value)
                    .send()
                    .await?
            }
            MarketCall::AcceptTicketOffer { offer_id, ticket_id, price } => {
                let sig = signature
                    .ok_or_else(|| anyhow!("{} requires a seller signature", call.method_name()))?;
                market
                    .acceptTicketOffer(*offer_id, *ticket_id, *price, sig.v, sig.r, sig.s)
                    .value(value)
                    .send()
                    .await?
            }
            MarketCall::AcceptChannelOffer { offer_id, channel_id, price } => {
                let sig = signature
                    .ok_or_else(|| anyhow!("{} requires a seller signature", call.method_name()))?;
                market
                    .acceptChannelOffer(*offer_id, *channel_id, *price, sig.v, sig.r, sig.s)
                    .value(value)
                    .send()
                    .await?
            }
        };

        let tx_hash = *pending_tx.tx_hash();
        debug!("Sent {} to {}: tx={:?}", call, contract, tx_hash);
        Ok(tx_hash)
    }

    /// Receipt of a transaction, `None` while it is not mined yet
    pub async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<ReceiptInfo>> {
        let provider = self.read_provider()?;

        let receipt = match provider.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => return Ok(None),
        };

        let confirmations = match receipt.block_number {
            Some(mined_at) => {
                let head = provider.get_block_number().await?;
                head.saturating_sub(mined_at) + 1
            }
            None => 0,
        };

        Ok(Some(ReceiptInfo {
            success: receipt.status(),
            block_number: receipt.block_number,
            confirmations,
        }))
    }
}
