use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend collection a purchase record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Ticket,
    TicketOffer,
    ChannelOffer,
}

impl RecordKind {
    /// Path segment of the backend collection
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Ticket => "tickets",
            Self::TicketOffer => "ticket-offers",
            Self::ChannelOffer => "channel-offers",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticket => write!(f, "ticket"),
            Self::TicketOffer => write!(f, "ticket-offer"),
            Self::ChannelOffer => write!(f, "channel-offer"),
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ticket" | "tickets" => Ok(Self::Ticket),
            "ticket-offer" | "ticket-offers" => Ok(Self::TicketOffer),
            "channel-offer" | "channel-offers" => Ok(Self::ChannelOffer),
            other => Err(format!("unknown record kind: {}", other)),
        }
    }
}

/// Identifies one business record (a ticket or an offer)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRef {
    pub kind: RecordKind,
    pub id: String,
}

impl RecordRef {
    pub fn new(kind: RecordKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    /// Map a backend status string.
    ///
    /// A missing status means the indexer has not seen the transaction yet.
    /// Any value other than PENDING/CONFIRMED is a failure.
    pub fn from_backend(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_uppercase()) {
            None => Self::Pending,
            Some(s) if s.is_empty() || s == "PENDING" => Self::Pending,
            Some(s) if s == "CONFIRMED" => Self::Confirmed,
            Some(_) => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight on-chain operation for a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub record: RecordRef,
    pub transaction_hash: String,
    pub status: TransactionStatus,
    pub submitted_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(record: RecordRef, transaction_hash: impl Into<String>) -> Self {
        Self {
            record,
            transaction_hash: transaction_hash.into(),
            status: TransactionStatus::Pending,
            submitted_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_backend() {
        assert_eq!(TransactionStatus::from_backend(None), TransactionStatus::Pending);
        assert_eq!(TransactionStatus::from_backend(Some("")), TransactionStatus::Pending);
        assert_eq!(TransactionStatus::from_backend(Some("pending")), TransactionStatus::Pending);
        assert_eq!(
            TransactionStatus::from_backend(Some("CONFIRMED")),
            TransactionStatus::Confirmed
        );
        assert_eq!(TransactionStatus::from_backend(Some("FAILED")), TransactionStatus::Failed);
        assert_eq!(TransactionStatus::from_backend(Some("REVERTED")), TransactionStatus::Failed);
    }

    #[test]
    fn test_record_kind_round_trip() {
        for kind in [RecordKind::Ticket, RecordKind::TicketOffer, RecordKind::ChannelOffer] {
            assert_eq!(kind.to_string().parse::<RecordKind>().unwrap(), kind);
        }
        assert_eq!(RecordKind::TicketOffer.collection(), "ticket-offers");
        assert!("listing".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_pending_transaction_json() {
        let pending = PendingTransaction::new(RecordRef::new(RecordKind::Ticket, "42"), "0xabc");
        assert!(!pending.is_terminal());

        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["transactionHash"], "0xabc");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["record"]["kind"], "ticket");
    }
}
