mod cli;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use ethereum::{
    Address, ClientConfig, EthereumNetwork, MarketCall, MarketplaceClient, U256, get_account_info,
    get_token_balance, parse_amount, resolve_rpc_url,
};
use purchase::{
    AllowanceGate, BalanceQuery, ChainClient, PurchaseConfig, PurchaseHandle, PurchaseRequest,
    PurchaseService, RecordKind, RecordRef, Step, WorkflowState,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::cli::{Cli, Commands, OfferTarget};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = monitoring::init_logging()?;

    let mut config = PurchaseConfig::from_env()?;
    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(rpc_url) = cli.rpc_url {
        config.rpc_url = Some(rpc_url);
    }
    if let Some(backend_url) = cli.backend_url {
        config.backend_url = backend_url;
    }
    if let Some(contract) = cli.contract {
        config.market_contract = Some(parse_address(&contract)?);
    }

    match cli.command {
        Commands::Networks => {
            for name in EthereumNetwork::list_networks() {
                if let Some(network) = EthereumNetwork::get_network(name) {
                    println!(
                        "{:<14} chain {:<10} {:<6} {}",
                        name,
                        network.chain_id,
                        network.native_currency.symbol,
                        if network.testnet { "testnet" } else { "mainnet" }
                    );
                }
            }
        }

        Commands::Balance { address, token } => {
            if config.rpc_url.is_none() {
                // Public endpoints, tried in turn
                match token {
                    None => {
                        let account = get_account_info(&address, &config.network).await?;
                        println!(
                            "{} {} on {} (nonce {})",
                            account.balance.formatted, account.symbol, account.network, account.nonce
                        );
                    }
                    Some(token) => {
                        let amount = get_token_balance(&address, &token, &config.network).await?;
                        println!("{} (raw {}, {} decimals)", amount.formatted, amount.raw, amount.decimals);
                    }
                }
            } else {
                let query = BalanceQuery::new(connect_chain(&config)?);
                let token = token.as_deref().map(parse_address).transpose()?;
                // Advisory read, an unreachable node shows zero
                let amount = query.get_balance(parse_address(&address)?, token).await;
                println!("{} (raw {}, {} decimals)", amount.formatted, amount.raw, amount.decimals);
            }
        }

        Commands::Allowance { owner, token, spender } => {
            let spender = match spender {
                Some(spender) => parse_address(&spender)?,
                None => config.require_contract()?,
            };
            let gate = AllowanceGate::new(connect_chain(&config)?, config.workflow.approval_policy);
            let snapshot = gate
                .check_allowance(parse_address(&token)?, parse_address(&owner)?, spender)
                .await?;
            if snapshot.amount == U256::MAX {
                println!("unlimited");
            } else {
                println!("{}", snapshot.amount);
            }
        }

        Commands::JoinChannel { record_id, channel_id, price, token } => {
            let chain = connect_chain(&config)?;
            let token = token.as_deref().map(parse_address).transpose()?;
            let price = parse_price(chain.as_ref(), &price, token).await?;
            let call = MarketCall::JoinChannel {
                channel_id: parse_u256(&channel_id)?,
                price,
            };
            let record = RecordRef::new(RecordKind::Ticket, record_id);
            run_purchase(&config, chain, record, call, token, None).await?;
        }

        Commands::AcceptOffer {
            target,
            record_id,
            offer_id,
            target_id,
            price,
            signature,
            token,
        } => {
            let chain = connect_chain(&config)?;
            let token = token.as_deref().map(parse_address).transpose()?;
            let price = parse_price(chain.as_ref(), &price, token).await?;
            let offer_id = parse_u256(&offer_id)?;
            let target_id = parse_u256(&target_id)?;

            let (kind, call) = match target {
                OfferTarget::Ticket => (
                    RecordKind::TicketOffer,
                    MarketCall::AcceptTicketOffer {
                        offer_id,
                        ticket_id: target_id,
                        price,
                    },
                ),
                OfferTarget::Channel => (
                    RecordKind::ChannelOffer,
                    MarketCall::AcceptChannelOffer {
                        offer_id,
                        channel_id: target_id,
                        price,
                    },
                ),
            };
            let record = RecordRef::new(kind, record_id);
            run_purchase(&config, chain, record, call, token, Some(signature)).await?;
        }

        Commands::Resume => {
            let service = PurchaseService::connect(&config)?;
            match service.resume_pending().await? {
                Some(handle) => follow(&service, handle).await?,
                None => println!("No pending transaction"),
            }
        }
    }

    Ok(())
}

async fn run_purchase(
    config: &PurchaseConfig,
    client: Arc<MarketplaceClient>,
    record: RecordRef,
    call: MarketCall,
    payment_token: Option<Address>,
    seller_signature: Option<String>,
) -> Result<()> {
    let buyer = client
        .address()
        .context("MARKETPLACE_PRIVATE_KEY is required to submit transactions")?;
    let balance = BalanceQuery::new(client).get_balance(buyer, payment_token).await;
    info!("Buyer {} balance: {}", buyer, balance.formatted);

    let request = PurchaseRequest {
        record,
        buyer,
        market_contract: config.require_contract()?,
        payment_token,
        call,
        seller_signature,
    };

    let service = PurchaseService::connect(config)?;
    let handle = service.start_purchase(request).await?;
    follow(&service, handle).await
}

/// Print state changes until the run ends; Ctrl-C cancels it
async fn follow(service: &PurchaseService, handle: PurchaseHandle) -> Result<()> {
    let record = handle.record.clone();
    let mut state = handle.state();
    let printer = tokio::spawn(async move {
        loop {
            print_state(&state.borrow_and_update());
            if state.changed().await.is_err() {
                break;
            }
        }
    });

    let wait = handle.wait();
    tokio::pin!(wait);
    let result = tokio::select! {
        result = &mut wait => result,
        _ = tokio::signal::ctrl_c() => {
            service.cancel_purchase(&record).await;
            wait.await
        }
    };

    printer.abort();
    if let Some(last) = service.state(&record).await {
        print_state(&last);
    }
    result.map_err(Into::into)
}

fn print_state(state: &WorkflowState) {
    match state.step {
        Step::Error => println!(
            "❌ {}: {}",
            state.step,
            state.error_message.as_deref().unwrap_or("unknown error")
        ),
        Step::Done => println!(
            "✅ {} {}",
            state.step,
            state.transaction_hash.as_deref().unwrap_or_default()
        ),
        step => match &state.transaction_hash {
            Some(hash) => println!("⏳ {} {}", step, hash),
            None => println!("⏳ {}", step),
        },
    }
}

fn connect_chain(config: &PurchaseConfig) -> Result<Arc<MarketplaceClient>> {
    let network = EthereumNetwork::get_network(&config.network)
        .ok_or_else(|| anyhow!("Unsupported network: {}", config.network))?;
    let client = MarketplaceClient::new(ClientConfig {
        rpc_url: resolve_rpc_url(config.rpc_url.clone(), &config.network)?,
        chain_id: network.chain_id,
        private_key: config.private_key.clone(),
    })?;
    Ok(Arc::new(client))
}

async fn parse_price(chain: &dyn ChainClient, price: &str, token: Option<Address>) -> Result<U256> {
    let decimals = match token {
        Some(token) => chain.token_decimals(token).await?,
        None => chain.native_decimals(),
    };
    parse_amount(price, decimals)
}

fn parse_address(value: &str) -> Result<Address> {
    Address::from_str(value).map_err(|e| anyhow!("Invalid address {}: {}", value, e))
}

fn parse_u256(value: &str) -> Result<U256> {
    U256::from_str(value).map_err(|e| anyhow!("Invalid number {}: {}", value, e))
}
