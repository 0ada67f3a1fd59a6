//! Blockchain client seam used by every workflow step

use async_trait::async_trait;
use ethereum::{Address, MarketCall, MarketplaceClient, ReceiptInfo, SplitSignature, TxHash, U256};

/// Chain capability the purchase workflow needs.
///
/// `ethereum::MarketplaceClient` implements it over alloy; tests use in-memory fakes.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Decimals of the chain's native currency
    fn native_decimals(&self) -> u8 {
        18
    }

    async fn native_balance(&self, owner: Address) -> anyhow::Result<U256>;

    async fn token_balance(&self, token: Address, owner: Address) -> anyhow::Result<U256>;

    async fn token_decimals(&self, token: Address) -> anyhow::Result<u8>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> anyhow::Result<U256>;

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> anyhow::Result<TxHash>;

    async fn send_market_call(
        &self,
        contract: Address,
        call: &MarketCall,
        signature: Option<&SplitSignature>,
        value: U256,
    ) -> anyhow::Result<TxHash>;

    async fn transaction_receipt(&self, tx_hash: TxHash) -> anyhow::Result<Option<ReceiptInfo>>;
}

#[async_trait]
impl ChainClient for MarketplaceClient {
    async fn native_balance(&self, owner: Address) -> anyhow::Result<U256> {
        MarketplaceClient::native_balance(self, owner).await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> anyhow::Result<U256> {
        MarketplaceClient::token_balance(self, token, owner).await
    }

    async fn token_decimals(&self, token: Address) -> anyhow::Result<u8> {
        MarketplaceClient::token_decimals(self, token).await
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> anyhow::Result<U256> {
        MarketplaceClient::allowance(self, token, owner, spender).await
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> anyhow::Result<TxHash> {
        MarketplaceClient::approve(self, token, spender, amount).await
    }

    async fn send_market_call(
        &self,
        contract: Address,
        call: &MarketCall,
        signature: Option<&SplitSignature>,
        value: U256,
    ) -> anyhow::Result<TxHash> {
        MarketplaceClient::send_market_call(self, contract, call, signature, value).await
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> anyhow::Result<Option<ReceiptInfo>> {
        MarketplaceClient::transaction_receipt(self, tx_hash).await
    }
}

/// Hash formatted the way it is stored in the backend and local storage
pub fn format_tx_hash(tx_hash: &TxHash) -> String {
    format!("{:?}", tx_hash)
}
