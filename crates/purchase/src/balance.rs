use crate::chain::ChainClient;
use crate::error::{PurchaseError, Result};
use ethereum::{Address, TokenAmount};
use std::sync::Arc;
use tracing::{debug, warn};

/// Balance reads for the buyer, in the native currency or an ERC20 token
#[derive(Clone)]
pub struct BalanceQuery {
    chain: Arc<dyn ChainClient>,
}

impl BalanceQuery {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Balance of `owner`, native when `token` is `None`.
    ///
    /// Token decimals are read from the contract.
    pub async fn try_get_balance(&self, owner: Address, token: Option<Address>) -> Result<TokenAmount> {
        let rpc_error = |e: anyhow::Error| PurchaseError::RpcUnavailable(e.to_string());

        let amount = match token {
            None => {
                let raw = self.chain.native_balance(owner).await.map_err(rpc_error)?;
                TokenAmount::new(raw, self.chain.native_decimals())
            }
            Some(token) => {
                let (raw, decimals) = tokio::try_join!(
                    self.chain.token_balance(token, owner),
                    self.chain.token_decimals(token)
                )
                .map_err(rpc_error)?;
                TokenAmount::new(raw, decimals)
            }
        };

        debug!("Balance of {} (token {:?}): {}", owner, token, amount.formatted);
        Ok(amount)
    }

    /// Like `try_get_balance`, but a failed read shows as zero
    pub async fn get_balance(&self, owner: Address, token: Option<Address>) -> TokenAmount {
        match self.try_get_balance(owner, token).await {
            Ok(amount) => amount,
            Err(e) => {
                warn!(owner = %owner, token = ?token, "Balance read failed, showing zero: {}", e);
                // Token decimals are unknown when the read failed
                TokenAmount::zero(self.chain.native_decimals())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChain;
    use ethereum::U256;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_token_balance_uses_token_decimals() {
        let chain = Arc::new(FakeChain::new());
        *chain.token_balance.lock() = U256::from(1_500_000u64);
        let query = BalanceQuery::new(chain);

        let amount = query
            .get_balance(Address::ZERO, Some(Address::repeat_byte(0x11)))
            .await;
        assert_eq!(amount.decimals, 6);
        assert_eq!(amount.formatted, "1.5");
    }

    #[tokio::test]
    async fn test_native_balance() {
        let chain = Arc::new(FakeChain::new());
        *chain.native_balance.lock() = U256::from(2_000_000_000_000_000_000u128);
        let query = BalanceQuery::new(chain);

        let amount = query.get_balance(Address::ZERO, None).await;
        assert_eq!(amount.decimals, 18);
        assert_eq!(amount.formatted, "2");
    }

    #[tokio::test]
    async fn test_rpc_failure_degrades_to_zero() {
        let chain = Arc::new(FakeChain::new());
        chain.fail_reads.store(true, Ordering::SeqCst);
        let query = BalanceQuery::new(chain);

        let err = query.try_get_balance(Address::ZERO, None).await.unwrap_err();
        assert!(matches!(err, PurchaseError::RpcUnavailable(_)));

        let amount = query.get_balance(Address::ZERO, None).await;
        assert!(amount.is_zero());
    }

    #[tokio::test]
    async fn test_token_read_failure_shows_zero() {
        let chain = Arc::new(FakeChain::new());
        *chain.token_balance.lock() = U256::from(1_500_000u64);
        chain.fail_reads.store(true, Ordering::SeqCst);
        let query = BalanceQuery::new(chain);

        let amount = query
            .get_balance(Address::repeat_byte(0x22), Some(Address::repeat_byte(0x11)))
            .await;
        assert!(amount.is_zero());
    }
}
