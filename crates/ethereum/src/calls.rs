use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marketplace contract calls submitted on behalf of a buyer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum MarketCall {
    /// Buy a ticket by joining a channel at the listed price
    JoinChannel { channel_id: U256, price: U256 },
    /// Accept a seller's signed offer for an existing ticket
    AcceptTicketOffer {
        offer_id: U256,
        ticket_id: U256,
        price: U256,
    },
    /// Accept a seller's signed offer for a whole channel
    AcceptChannelOffer {
        offer_id: U256,
        channel_id: U256,
        price: U256,
    },
}

impl MarketCall {
    /// Solidity method name, used in logs and error messages
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::JoinChannel { .. } => "joinChannel",
            Self::AcceptTicketOffer { .. } => "acceptTicketOffer",
            Self::AcceptChannelOffer { .. } => "acceptChannelOffer",
        }
    }

    /// Offer acceptance carries an off-chain seller authorization
    pub fn requires_signature(&self) -> bool {
        !matches!(self, Self::JoinChannel { .. })
    }

    pub fn price(&self) -> U256 {
        match self {
            Self::JoinChannel { price, .. }
            | Self::AcceptTicketOffer { price, .. }
            | Self::AcceptChannelOffer { price, .. } => *price,
        }
    }
}

impl fmt::Display for MarketCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoinChannel { channel_id, price } => {
                write!(f, "joinChannel(channel={}, price={})", channel_id, price)
            }
            Self::AcceptTicketOffer { offer_id, ticket_id, price } => write!(
                f,
                "acceptTicketOffer(offer={}, ticket={}, price={})",
                offer_id, ticket_id, price
            ),
            Self::AcceptChannelOffer { offer_id, channel_id, price } => write!(
                f,
                "acceptChannelOffer(offer={}, channel={}, price={})",
                offer_id, channel_id, price
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        let join = MarketCall::JoinChannel {
            channel_id: U256::from(7),
            price: U256::from(100),
        };
        assert_eq!(join.method_name(), "joinChannel");
        assert!(!join.requires_signature());
        assert_eq!(join.price(), U256::from(100));

        let accept = MarketCall::AcceptTicketOffer {
            offer_id: U256::from(1),
            ticket_id: U256::from(2),
            price: U256::from(3),
        };
        assert_eq!(accept.method_name(), "acceptTicketOffer");
        assert!(accept.requires_signature());
        assert_eq!(
            accept.to_string(),
            "acceptTicketOffer(offer=1, ticket=2, price=3)"
        );
    }
}
