// config.rs
use std::env;

use crate::errors::AppError;

/// Resolved Daraja endpoint URLs for the configured environment.
#[derive(Debug, Clone)]
pub struct DarajaUrls {
    pub auth: String,
    pub stk_push: String,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_environment: String,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mpesa_environment =
            env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());

        Ok(AppConfig {
            mpesa_consumer_key: require("MPESA_CONSUMER_KEY")?,
            mpesa_consumer_secret: require("MPESA_CONSUMER_SECRET")?,
            mpesa_short_code: require("MPESA_SHORTCODE")?,
            mpesa_passkey: require("MPESA_PASSKEY")?,
            mpesa_callback_url: env::var("MPESA_CALLBACK_URL")
                .unwrap_or_else(|_| "https://yourdomain.com/mpesa-callback".to_string()),
            mpesa_environment,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| AppError::Configuration("PORT must be a number".to_string()))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == "production"
    }

    fn base_url(&self) -> &'static str {
        if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        }
    }

    pub fn daraja_urls(&self) -> DarajaUrls {
        let base = self.base_url();
        DarajaUrls {
            auth: format!("{}/oauth/v1/generate?grant_type=client_credentials", base),
            stk_push: format!("{}/mpesa/stkpush/v1/processrequest", base),
            query: format!("{}/mpesa/stkpushquery/v1/query", base),
        }
    }
}

fn require(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Configuration(format!("{} must be set", name)))
}
