pub mod balance;
pub mod calls;
pub mod client;
pub mod contracts;
pub mod networks;
pub mod signature;

pub use balance::{
    get_balance_wei,
    get_token_balance,
    get_account_info,
    format_amount,
    parse_amount,
    AccountInfo,
    TokenAmount,
};

pub use calls::MarketCall;

pub use client::{
    ClientConfig,
    MarketplaceClient,
    ReceiptInfo,
};

pub use networks::{
    resolve_rpc_url,
    EthereumNetwork,
    NativeCurrency,
};

pub use signature::{split_signature, SplitSignature, SIGNATURE_LENGTH};

// Re-export commonly used alloy primitives
pub use alloy::primitives::{Address, TxHash, U256};
