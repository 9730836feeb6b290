// handlers/payment_handlers.rs
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::transaction::{Transaction, TransactionStatus};
use crate::services::phone::format_phone_number;
use crate::state::AppState;
use crate::store::TransactionStore;

const SERVICE_NAME: &str = "Fuliza M-Pesa API";

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub phone: Option<String>,
    // Clients send the amount as either a JSON string or a number.
    pub amount: Option<Value>,
    pub reference: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MpesaCallback {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<Value>,
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<Value>> {
    let (phone, amount, reference) = validate_initiate(&request)?;

    let response = state
        .mpesa
        .initiate_stk_push(&phone, &amount, &reference, request.description.as_deref())
        .await?;

    let txn = Transaction::pending(
        reference.clone(),
        response.checkout_request_id.clone(),
        response.merchant_request_id,
        format_phone_number(&phone),
        amount,
        request.user_id,
        request.description,
    );
    state.store.put(txn);

    Ok(Json(json!({
        "success": true,
        "message": "STK Push initiated successfully",
        "checkoutRequestID": response.checkout_request_id,
        "reference": reference,
    })))
}

/// Daraja result delivery. Parse failures and unknown transactions are
/// absorbed: the acknowledgement must always go back, or Daraja keeps
/// retrying the delivery.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    let callback: MpesaCallback = match serde_json::from_value(payload) {
        Ok(callback) => callback,
        Err(e) => {
            warn!("Invalid callback format: {}", e);
            return Json(json!({"ResultCode": 1, "ResultDesc": "Invalid callback format"}));
        }
    };

    apply_stk_callback(state.store.as_ref(), &callback.body.stk_callback);

    Json(json!({"ResultCode": 0, "ResultDesc": "Success"}))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<Value>> {
    let reference = params
        .reference
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Reference is required".to_string()))?;

    let txn = state.store.get(&reference).ok_or(AppError::NotFound)?;

    // Terminal states answer from the store; only a pending transaction
    // triggers a live Daraja query.
    if txn.is_terminal() {
        return Ok(Json(status_view(&txn)));
    }

    match state.mpesa.query_stk_status(&txn.checkout_request_id).await {
        Ok(query) => {
            let refreshed = if query.result_code == "0" {
                state
                    .store
                    .complete(&reference, query.mpesa_receipt_number, None)
            } else {
                let message = query
                    .result_desc
                    .unwrap_or_else(|| "Payment failed".to_string());
                state.store.fail(&reference, message)
            };
            let refreshed = refreshed.ok_or(AppError::NotFound)?;
            Ok(Json(status_view(&refreshed)))
        }
        Err(e) => {
            // Daraja answers the query with an error while the push is
            // still on the handset; report pending rather than failing
            // the poll.
            warn!("Live status query for {} inconclusive: {}", reference, e);
            Ok(Json(status_view(&txn)))
        }
    }
}

pub async fn list_transactions(State(state): State<AppState>) -> Json<Value> {
    let transactions = state.store.list();
    Json(json!({
        "success": true,
        "count": transactions.len(),
        "transactions": transactions,
    }))
}

fn validate_initiate(request: &InitiatePaymentRequest) -> Result<(String, String, String)> {
    let phone = request.phone.as_deref().unwrap_or("").trim().to_string();
    let amount = request.amount.as_ref().and_then(value_to_string);
    let reference = request.reference.as_deref().unwrap_or("").trim().to_string();

    match (phone.is_empty(), &amount, reference.is_empty()) {
        (false, Some(amount), false) if !amount.is_empty() => {
            Ok((phone, amount.clone(), reference))
        }
        _ => Err(AppError::Validation(
            "Phone, amount, and reference are required".to_string(),
        )),
    }
}

fn apply_stk_callback(store: &dyn TransactionStore, callback: &StkCallback) {
    let Some(reference) = store.find_by_checkout_id(&callback.checkout_request_id) else {
        warn!(
            "Callback for unknown CheckoutRequestID: {}",
            callback.checkout_request_id
        );
        return;
    };

    if callback.result_code == 0 {
        let receipt = metadata_item(callback, "MpesaReceiptNumber");
        let date = metadata_item(callback, "TransactionDate");
        store.complete(&reference, receipt, date);
        info!("Payment completed for reference: {}", reference);
    } else {
        store.fail(&reference, callback.result_desc.clone());
        info!(
            "Payment failed for reference: {} - {}",
            reference, callback.result_desc
        );
    }
}

fn metadata_item(callback: &StkCallback, name: &str) -> Option<String> {
    callback
        .callback_metadata
        .as_ref()?
        .items
        .iter()
        .find(|item| item.name == name)
        .and_then(|item| item.value.as_ref())
        .and_then(value_to_string)
}

/// Daraja metadata values arrive as strings or numbers (TransactionDate
/// and Amount are numbers on the wire).
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn status_view(txn: &Transaction) -> Value {
    match txn.status {
        TransactionStatus::Completed => json!({
            "success": true,
            "status": "completed",
            "mpesaReceiptNumber": txn.mpesa_receipt_number,
            "amount": txn.amount,
            "phone": txn.phone,
            "reference": txn.reference,
        }),
        TransactionStatus::Failed => json!({
            "success": false,
            "status": "failed",
            "message": txn.error_message.as_deref().unwrap_or("Payment failed"),
        }),
        TransactionStatus::Pending => json!({
            "success": true,
            "status": "pending",
            "message": "Payment still pending. Waiting for M-Pesa confirmation.",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::services::mpesa_service::MpesaService;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn state_with(store: MemoryStore) -> AppState {
        let config = AppConfig {
            mpesa_consumer_key: "key".to_string(),
            mpesa_consumer_secret: "secret".to_string(),
            mpesa_short_code: "174379".to_string(),
            mpesa_passkey: "passkey".to_string(),
            mpesa_callback_url: "https://example.com/mpesa-callback".to_string(),
            mpesa_environment: "sandbox".to_string(),
            port: 3000,
            host: "0.0.0.0".to_string(),
        };
        AppState::new(
            Arc::new(MpesaService::new(config).unwrap()),
            Arc::new(store),
        )
    }

    fn pending(reference: &str, checkout_id: &str) -> Transaction {
        Transaction::pending(
            reference.to_string(),
            checkout_id.to_string(),
            "29115-34620561-1".to_string(),
            "254712345678".to_string(),
            "150".to_string(),
            None,
            None,
        )
    }

    fn success_callback(checkout_id: &str) -> StkCallback {
        serde_json::from_value(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_id,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": {
                "Item": [
                    {"Name": "Amount", "Value": 150.0},
                    {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                    {"Name": "TransactionDate", "Value": 20260829121530u64},
                    {"Name": "PhoneNumber", "Value": 254712345678u64}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn validate_requires_phone_amount_reference() {
        let request: InitiatePaymentRequest = serde_json::from_value(json!({
            "phone": "0712345678",
            "amount": 150,
        }))
        .unwrap();
        assert!(matches!(
            validate_initiate(&request),
            Err(AppError::Validation(_))
        ));

        let request: InitiatePaymentRequest = serde_json::from_value(json!({
            "amount": "150",
            "reference": "ORDER-1",
        }))
        .unwrap();
        assert!(validate_initiate(&request).is_err());

        let request: InitiatePaymentRequest = serde_json::from_value(json!({
            "phone": "0712345678",
            "reference": "ORDER-1",
        }))
        .unwrap();
        assert!(validate_initiate(&request).is_err());
    }

    #[test]
    fn validate_accepts_numeric_amount() {
        let request: InitiatePaymentRequest = serde_json::from_value(json!({
            "phone": "0712345678",
            "amount": 150,
            "reference": "ORDER-1",
            "userId": "user-7",
        }))
        .unwrap();
        let (phone, amount, reference) = validate_initiate(&request).unwrap();
        assert_eq!(phone, "0712345678");
        assert_eq!(amount, "150");
        assert_eq!(reference, "ORDER-1");
    }

    #[test]
    fn callback_parses_daraja_envelope() {
        let callback: MpesaCallback = serde_json::from_value(json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        }))
        .unwrap();
        let stk = callback.body.stk_callback;
        assert_eq!(stk.result_code, 1032);
        assert!(stk.callback_metadata.is_none());
    }

    #[test]
    fn successful_callback_completes_and_extracts_receipt() {
        let store = MemoryStore::new();
        store.put(pending("ORDER-1", "ws_CO_1"));

        apply_stk_callback(&store, &success_callback("ws_CO_1"));

        let txn = store.get("ORDER-1").unwrap();
        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(txn.mpesa_receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(txn.transaction_date.as_deref(), Some("20260829121530"));
    }

    #[test]
    fn failed_callback_records_result_desc() {
        let store = MemoryStore::new();
        store.put(pending("ORDER-1", "ws_CO_1"));

        let callback: StkCallback = serde_json::from_value(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_1",
            "ResultCode": 1032,
            "ResultDesc": "Request cancelled by user"
        }))
        .unwrap();
        apply_stk_callback(&store, &callback);

        let txn = store.get("ORDER-1").unwrap();
        assert_eq!(txn.status, TransactionStatus::Failed);
        assert_eq!(
            txn.error_message.as_deref(),
            Some("Request cancelled by user")
        );
    }

    #[test]
    fn callback_for_unknown_checkout_id_changes_nothing() {
        let store = MemoryStore::new();
        store.put(pending("ORDER-1", "ws_CO_1"));

        apply_stk_callback(&store, &success_callback("ws_CO_99"));

        assert_eq!(
            store.get("ORDER-1").unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[test]
    fn duplicate_callback_is_a_no_op() {
        let store = MemoryStore::new();
        store.put(pending("ORDER-1", "ws_CO_1"));

        apply_stk_callback(&store, &success_callback("ws_CO_1"));

        // A racing failure result for the same push must not win.
        let late: StkCallback = serde_json::from_value(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_1",
            "ResultCode": 1037,
            "ResultDesc": "DS timeout"
        }))
        .unwrap();
        apply_stk_callback(&store, &late);

        let txn = store.get("ORDER-1").unwrap();
        assert_eq!(txn.status, TransactionStatus::Completed);
        assert_eq!(txn.mpesa_receipt_number.as_deref(), Some("NLJ7RT61SV"));
    }

    #[tokio::test]
    async fn terminal_status_answers_from_store_without_outbound_call() {
        let store = MemoryStore::new();
        store.put(pending("ORDER-1", "ws_CO_1"));
        store.complete("ORDER-1", Some("NLJ7RT61SV".to_string()), None);
        store.put(pending("ORDER-2", "ws_CO_2"));
        store.fail("ORDER-2", "Request cancelled by user".to_string());
        let state = state_with(store);

        // Terminal transactions answer from the store; the handler returns
        // before the Daraja client is touched, so no network is involved.
        let view = payment_status(
            State(state.clone()),
            Query(StatusParams {
                reference: Some("ORDER-1".to_string()),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(view["status"], "completed");
        assert_eq!(view["mpesaReceiptNumber"], "NLJ7RT61SV");
        assert_eq!(view["reference"], "ORDER-1");

        let view = payment_status(
            State(state),
            Query(StatusParams {
                reference: Some("ORDER-2".to_string()),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(view["status"], "failed");
        assert_eq!(view["message"], "Request cancelled by user");
    }

    #[tokio::test]
    async fn status_for_unknown_reference_is_not_found() {
        let state = state_with(MemoryStore::new());

        let err = payment_status(
            State(state),
            Query(StatusParams {
                reference: Some("NOPE".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn status_without_reference_is_rejected() {
        let state = state_with(MemoryStore::new());

        let err = payment_status(State(state), Query(StatusParams { reference: None }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn status_views_per_state() {
        let mut txn = pending("ORDER-1", "ws_CO_1");
        let view = status_view(&txn);
        assert_eq!(view["status"], "pending");
        assert_eq!(view["success"], true);

        txn.status = TransactionStatus::Completed;
        txn.mpesa_receipt_number = Some("NLJ7RT61SV".to_string());
        let view = status_view(&txn);
        assert_eq!(view["status"], "completed");
        assert_eq!(view["mpesaReceiptNumber"], "NLJ7RT61SV");
        assert_eq!(view["reference"], "ORDER-1");

        txn.status = TransactionStatus::Failed;
        txn.error_message = Some("Request cancelled by user".to_string());
        let view = status_view(&txn);
        assert_eq!(view["success"], false);
        assert_eq!(view["message"], "Request cancelled by user");
    }
}
