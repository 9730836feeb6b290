use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Completed and failed are absorbing; only pending may transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One STK-Push attempt, keyed by the caller-chosen reference. The
/// checkout request id is the Daraja-assigned correlation key used to
/// match the asynchronous callback back to this record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub reference: String,
    #[serde(rename = "checkoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "merchantRequestID")]
    pub merchant_request_id: String,
    pub phone: String,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpesa_receipt_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn pending(
        reference: String,
        checkout_request_id: String,
        merchant_request_id: String,
        phone: String,
        amount: String,
        user_id: Option<String>,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Transaction {
            reference,
            checkout_request_id,
            merchant_request_id,
            phone,
            amount,
            user_id,
            description,
            status: TransactionStatus::Pending,
            mpesa_receipt_number: None,
            transaction_date: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
