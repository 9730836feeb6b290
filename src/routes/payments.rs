use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::payment_handlers;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(payment_handlers::health))
        .route("/initiate-payment", post(payment_handlers::initiate_payment))
        .route("/mpesa-callback", post(payment_handlers::mpesa_callback))
        .route("/payment-status", get(payment_handlers::payment_status))
        .route("/transactions", get(payment_handlers::list_transactions))
}
