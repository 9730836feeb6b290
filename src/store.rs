// src/store.rs
//
// Process-lifetime transaction store. The trait is the seam: handlers only
// see `dyn TransactionStore`, so tests run against the in-memory map and a
// durable backend can be dropped in without touching them.
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::models::transaction::{Transaction, TransactionStatus};

pub trait TransactionStore: Send + Sync {
    /// Insert or replace the transaction for its reference. A repeated
    /// reference overwrites silently.
    fn put(&self, txn: Transaction);

    fn get(&self, reference: &str) -> Option<Transaction>;

    /// Reverse lookup for callback correlation. Linear scan; volume here
    /// never justifies an index.
    fn find_by_checkout_id(&self, checkout_request_id: &str) -> Option<String>;

    /// Transition pending -> completed. A transaction already in a terminal
    /// state is left untouched and its stored snapshot returned, so a
    /// callback/poll race or a duplicate callback is a no-op.
    fn complete(
        &self,
        reference: &str,
        receipt_number: Option<String>,
        transaction_date: Option<String>,
    ) -> Option<Transaction>;

    /// Transition pending -> failed. Same no-op rule as `complete`.
    fn fail(&self, reference: &str, error_message: String) -> Option<Transaction>;

    fn list(&self) -> Vec<Transaction>;
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Transaction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionStore for MemoryStore {
    fn put(&self, txn: Transaction) {
        let mut map = self.inner.lock().unwrap();
        map.insert(txn.reference.clone(), txn);
    }

    fn get(&self, reference: &str) -> Option<Transaction> {
        let map = self.inner.lock().unwrap();
        map.get(reference).cloned()
    }

    fn find_by_checkout_id(&self, checkout_request_id: &str) -> Option<String> {
        let map = self.inner.lock().unwrap();
        map.values()
            .find(|txn| txn.checkout_request_id == checkout_request_id)
            .map(|txn| txn.reference.clone())
    }

    fn complete(
        &self,
        reference: &str,
        receipt_number: Option<String>,
        transaction_date: Option<String>,
    ) -> Option<Transaction> {
        let mut map = self.inner.lock().unwrap();
        let txn = map.get_mut(reference)?;
        if txn.status == TransactionStatus::Pending {
            txn.status = TransactionStatus::Completed;
            txn.mpesa_receipt_number = receipt_number;
            txn.transaction_date = transaction_date;
            txn.updated_at = Utc::now();
        }
        Some(txn.clone())
    }

    fn fail(&self, reference: &str, error_message: String) -> Option<Transaction> {
        let mut map = self.inner.lock().unwrap();
        let txn = map.get_mut(reference)?;
        if txn.status == TransactionStatus::Pending {
            txn.status = TransactionStatus::Failed;
            txn.error_message = Some(error_message);
            txn.updated_at = Utc::now();
        }
        Some(txn.clone())
    }

    fn list(&self) -> Vec<Transaction> {
        let map = self.inner.lock().unwrap();
        map.values().cloned().collect()
    }
}
