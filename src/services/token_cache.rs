// services/token_cache.rs
use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::Result;

/// Tokens are refreshed this many seconds before Daraja's stated expiry,
/// so a token handed out near the deadline is still accepted upstream.
const SAFETY_MARGIN_SECS: i64 = 300;

/// Daraja's documented token lifetime, used when `expires_in` is missing
/// or unparseable.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

struct CachedToken {
    token: String,
    deadline: DateTime<Utc>,
}

/// Single cached OAuth bearer token. The async mutex is held across the
/// credential exchange, so concurrent cold-cache callers serialize behind
/// one refresh instead of each issuing their own.
#[derive(Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token while it is before its soft deadline;
    /// otherwise run `refresh` (which yields the token and its
    /// provider-stated lifetime in seconds) and cache the result.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, i64)>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if Utc::now() < cached.deadline {
                return Ok(cached.token.clone());
            }
        }

        let (token, expires_in) = refresh().await?;
        let lifetime = (expires_in - SAFETY_MARGIN_SECS).max(0);
        *slot = Some(CachedToken {
            token: token.clone(),
            deadline: Utc::now() + Duration::seconds(lifetime),
        });
        info!("Cached new access token (soft lifetime {}s)", lifetime);
        Ok(token)
    }
}
