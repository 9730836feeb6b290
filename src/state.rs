use std::sync::Arc;

use crate::services::mpesa_service::MpesaService;
use crate::store::TransactionStore;

#[derive(Clone)]
pub struct AppState {
    pub mpesa: Arc<MpesaService>,
    pub store: Arc<dyn TransactionStore>,
}

impl AppState {
    pub fn new(mpesa: Arc<MpesaService>, store: Arc<dyn TransactionStore>) -> Self {
        AppState { mpesa, store }
    }
}
