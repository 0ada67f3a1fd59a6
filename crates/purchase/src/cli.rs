use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "marketplace")]
#[command(about = "Buy tickets and accept offers on the channel marketplace", long_about = None)]
pub struct Cli {
    /// Network name (mainnet, sepolia, polygon, base, localhost, ...)
    #[arg(long, global = true, env = "MARKETPLACE_NETWORK")]
    pub network: Option<String>,

    /// RPC endpoint, overrides the network's public endpoints
    #[arg(long, global = true, env = "MARKETPLACE_RPC_URL")]
    pub rpc_url: Option<String>,

    #[arg(long, global = true, env = "MARKETPLACE_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Market contract address
    #[arg(long, global = true, env = "MARKETPLACE_CONTRACT")]
    pub contract: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OfferTarget {
    /// Offer for an existing ticket
    Ticket,
    /// Offer for a whole channel
    Channel,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the native or ERC20 balance of an address
    Balance {
        address: String,

        /// ERC20 token address, native currency when omitted
        #[arg(long)]
        token: Option<String>,
    },

    /// Show how much of a token the market contract may spend
    Allowance {
        owner: String,

        token: String,

        /// Spender address, defaults to the market contract
        #[arg(long)]
        spender: Option<String>,
    },

    /// Buy a ticket by joining a channel
    JoinChannel {
        /// Backend id of the ticket record
        #[arg(long)]
        record_id: String,

        #[arg(long)]
        channel_id: String,

        /// Price as a decimal amount ("1.5")
        #[arg(long)]
        price: String,

        /// ERC20 payment token, native currency when omitted
        #[arg(long)]
        token: Option<String>,
    },

    /// Accept a seller's signed offer
    AcceptOffer {
        #[arg(long, value_enum)]
        target: OfferTarget,

        /// Backend id of the offer record
        #[arg(long)]
        record_id: String,

        #[arg(long)]
        offer_id: String,

        /// Ticket id or channel id, depending on the target
        #[arg(long)]
        target_id: String,

        /// Price as a decimal amount ("1.5")
        #[arg(long)]
        price: String,

        /// Hex encoded 65 byte seller signature
        #[arg(long)]
        signature: String,

        /// ERC20 payment token, native currency when omitted
        #[arg(long)]
        token: Option<String>,
    },

    /// Continue watching a transaction submitted before a restart
    Resume,

    /// List supported networks
    Networks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accept_offer() {
        let cli = Cli::try_parse_from([
            "marketplace",
            "--network",
            "sepolia",
            "accept-offer",
            "--target",
            "channel",
            "--record-id",
            "abc",
            "--offer-id",
            "7",
            "--target-id",
            "3",
            "--price",
            "1.5",
            "--signature",
            "0x00",
        ])
        .unwrap();

        assert_eq!(cli.network.as_deref(), Some("sepolia"));
        match cli.command {
            Commands::AcceptOffer { target, offer_id, token, .. } => {
                assert_eq!(target, OfferTarget::Channel);
                assert_eq!(offer_id, "7");
                assert!(token.is_none());
            }
            _ => panic!("expected accept-offer"),
        }
    }

    #[test]
    fn test_join_channel_requires_price() {
        assert!(
            Cli::try_parse_from(["marketplace", "join-channel", "--record-id", "1", "--channel-id", "2"])
                .is_err()
        );
    }
}
