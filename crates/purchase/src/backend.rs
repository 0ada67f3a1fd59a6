//! Backend record API: tickets, ticket offers and channel offers

use crate::constants::BACKEND_REQUEST_TIMEOUT_SECS;
use crate::error::{PurchaseError, Result};
use crate::pending::{PendingTransaction, RecordKind, RecordRef, TransactionStatus};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// The fields of a record the workflow reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

impl RecordSnapshot {
    pub fn transaction_status(&self) -> TransactionStatus {
        TransactionStatus::from_backend(self.status.as_deref())
    }
}

/// Partial update, unset fields are left untouched by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: TransactionStatus) -> Self {
        Self {
            status: Some(status),
            transaction_hash: None,
        }
    }

    pub fn pending(transaction_hash: impl Into<String>) -> Self {
        Self {
            status: Some(TransactionStatus::Pending),
            transaction_hash: Some(transaction_hash.into()),
        }
    }
}

/// Source of truth for record status; an indexer reconciles chain confirmations into it
#[async_trait]
pub trait RecordBackend: Send + Sync {
    async fn get_record(&self, record: &RecordRef) -> Result<RecordSnapshot>;

    /// Fails with `RecordNotFound` when the record does not exist yet
    async fn update_record(&self, record: &RecordRef, update: &RecordUpdate) -> Result<()>;

    async fn create_record(&self, pending: &PendingTransaction) -> Result<RecordSnapshot>;
}

/// JSON over HTTP implementation of `RecordBackend`
pub struct HttpRecordBackend {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRecordBackend {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(BACKEND_REQUEST_TIMEOUT_SECS))
            .user_agent("marketplace-purchase")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn collection_url(&self, kind: RecordKind) -> String {
        format!("{}/{}", self.base_url, kind.collection())
    }

    fn record_url(&self, record: &RecordRef) -> String {
        format!("{}/{}", self.collection_url(record.kind), record.id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RecordBackend for HttpRecordBackend {
    async fn get_record(&self, record: &RecordRef) -> Result<RecordSnapshot> {
        let url = self.record_url(record);
        debug!("GET {}", url);

        let resp = self.authorize(self.client.get(&url)).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(PurchaseError::RecordNotFound(record.clone())),
            status => Err(PurchaseError::Backend(format!(
                "GET {} returned {}",
                url, status
            ))),
        }
    }

    async fn update_record(&self, record: &RecordRef, update: &RecordUpdate) -> Result<()> {
        let url = self.record_url(record);
        debug!("PATCH {} {:?}", url, update);

        let resp = self
            .authorize(self.client.patch(&url))
            .json(update)
            .send()
            .await?;
        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(PurchaseError::RecordNotFound(record.clone())),
            status => Err(PurchaseError::Backend(format!(
                "PATCH {} returned {}",
                url, status
            ))),
        }
    }

    async fn create_record(&self, pending: &PendingTransaction) -> Result<RecordSnapshot> {
        let url = self.collection_url(pending.record.kind);
        debug!("POST {} for {}", url, pending.record);

        let body = json!({
            "id": pending.record.id,
            "status": pending.status,
            "transactionHash": pending.transaction_hash,
            "submittedAt": pending.submitted_at,
        });

        let resp = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(resp.json().await?),
            status => Err(PurchaseError::Backend(format!(
                "POST {} returned {}",
                url, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_urls() {
        let backend = HttpRecordBackend::new("https://api.example.com/v1/", None).unwrap();
        let record = RecordRef::new(RecordKind::ChannelOffer, "17");
        assert_eq!(
            backend.record_url(&record),
            "https://api.example.com/v1/channel-offers/17"
        );
        assert_eq!(
            backend.collection_url(RecordKind::Ticket),
            "https://api.example.com/v1/tickets"
        );
    }

    #[test]
    fn test_partial_update_body() {
        let body = serde_json::to_value(RecordUpdate::pending("0xabc")).unwrap();
        assert_eq!(body, json!({"status": "PENDING", "transactionHash": "0xabc"}));

        let body = serde_json::to_value(RecordUpdate::status(TransactionStatus::Failed)).unwrap();
        assert_eq!(body, json!({"status": "FAILED"}));
    }

    #[test]
    fn test_snapshot_parsing() {
        let snapshot: RecordSnapshot =
            serde_json::from_value(json!({"id": "5", "status": "CONFIRMED", "price": 10})).unwrap();
        assert_eq!(snapshot.transaction_status(), TransactionStatus::Confirmed);
        assert!(snapshot.transaction_hash.is_none());

        let snapshot: RecordSnapshot = serde_json::from_value(json!({"id": "6"})).unwrap();
        assert_eq!(snapshot.transaction_status(), TransactionStatus::Pending);
    }
}
