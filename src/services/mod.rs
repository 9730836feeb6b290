pub mod mpesa_service;
pub mod phone;
pub mod token_cache;
