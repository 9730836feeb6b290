// services/mpesa_service.rs
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{AppConfig, DarajaUrls};
use crate::errors::{AppError, Result};
use crate::services::phone::format_phone_number;
use crate::services::token_cache::{TokenCache, DEFAULT_EXPIRES_IN_SECS};

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResultCode")]
    pub result_code: String,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "MpesaReceiptNumber")]
    pub mpesa_receipt_number: Option<String>,
}

/// Daraja client: OAuth token exchange, STK-Push initiation and status
/// query. One instance per process; the token cache inside it is the only
/// cross-request mutable state.
pub struct MpesaService {
    config: AppConfig,
    urls: DarajaUrls,
    client: Client,
    token_cache: TokenCache,
}

impl MpesaService {
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let urls = config.daraja_urls();
        Ok(MpesaService {
            config,
            urls,
            client,
            token_cache: TokenCache::new(),
        })
    }

    fn generate_timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.mpesa_short_code, self.config.mpesa_passkey, timestamp
        );
        base64.encode(password_string)
    }

    pub async fn get_access_token(&self) -> Result<String> {
        self.token_cache
            .get_or_refresh(|| self.fetch_token())
            .await
    }

    async fn fetch_token(&self) -> Result<(String, i64)> {
        info!("Requesting new access token");
        let auth_string = format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let mut last_err = None;
        for attempt in 0..2 {
            let response = match self
                .client
                .get(&self.urls.auth)
                .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("Token exchange attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("Failed to get access token: {} - {}", status, body);
                return Err(AppError::Auth(format!("M-Pesa auth failed: {}", status)));
            }

            let auth_response: AuthResponse = response
                .json()
                .await
                .map_err(|e| AppError::Auth(format!("Malformed auth response: {}", e)))?;
            let expires_in = auth_response
                .expires_in
                .parse()
                .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
            return Ok((auth_response.access_token, expires_in));
        }

        Err(AppError::Auth(format!(
            "M-Pesa auth request failed: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Initiate an STK push towards the subscriber's handset. Returns the
    /// Daraja correlation ids for the transaction record.
    pub async fn initiate_stk_push(
        &self,
        phone: &str,
        amount: &str,
        reference: &str,
        description: Option<&str>,
    ) -> Result<StkPushResponse> {
        let formatted_phone = format_phone_number(phone);
        info!("STK push for {} - KSh {} ({})", formatted_phone, amount, reference);

        let access_token = self.get_access_token().await?;
        let timestamp = Self::generate_timestamp();
        let password = self.generate_password(&timestamp);

        let stk_request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.mpesa_callback_url.clone(),
            account_reference: reference.to_string(),
            transaction_desc: description.unwrap_or("Fuliza Increment Payment").to_string(),
        };

        let mut last_err = None;
        for attempt in 0..2 {
            let response = match self
                .client
                .post(&self.urls.stk_push)
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .header(header::CONTENT_TYPE, "application/json")
                .json(&stk_request)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("STK push attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("STK push failed: {} - {}", status, body);
                return Err(AppError::Provider(provider_error_message(status, &body)));
            }

            let stk_response: StkPushResponse = response
                .json()
                .await
                .map_err(|e| AppError::Provider(format!("Malformed STK push response: {}", e)))?;
            info!("STK push initiated: {}", stk_response.checkout_request_id);
            return Ok(stk_response);
        }

        Err(AppError::Provider(format!(
            "STK push request failed: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Query Daraja for the outcome of an initiated push. Not retried:
    /// the client polls this path anyway.
    pub async fn query_stk_status(&self, checkout_request_id: &str) -> Result<StkQueryResponse> {
        let access_token = self.get_access_token().await?;
        let timestamp = Self::generate_timestamp();
        let password = self.generate_password(&timestamp);

        let query_request = StkQueryRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(&self.urls.query)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&query_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("STK query failed: {} - {}", status, body);
            return Err(AppError::Provider(provider_error_message(status, &body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Malformed STK query response: {}", e)))
    }
}

/// Pull Daraja's `errorMessage` out of an error body when it parses,
/// otherwise fall back to the HTTP status.
fn provider_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("errorMessage").and_then(|m| m.as_str().map(String::from)))
        .unwrap_or_else(|| format!("M-Pesa request failed: {}", status))
}
