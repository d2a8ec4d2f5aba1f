//! Bearer-token session against the relay.
//!
//! The token is fetched lazily, refreshed `refresh_margin` before it expires,
//! and re-acquired exactly once per call when the relay rejects it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shroud_error::{Result, ShroudError};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::RelayTransport;

struct Token {
    value: String,
    expires_at: Instant,
}

pub struct AuthSession<T> {
    transport: Arc<T>,
    api_key: Option<String>,
    refresh_margin: Duration,
    token: Mutex<Option<Token>>,
}

impl<T> fmt::Debug for AuthSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("has_api_key", &self.api_key.is_some())
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

fn is_unauthorized(err: &ShroudError) -> bool {
    matches!(err, ShroudError::Relay { status: 401, .. })
}

impl<T: RelayTransport> AuthSession<T> {
    pub fn new(transport: Arc<T>, api_key: Option<String>, refresh_margin: Duration) -> Self {
        Self {
            transport,
            api_key,
            refresh_margin,
            token: Mutex::new(None),
        }
    }

    /// Current bearer token, logging in if absent or about to expire
    pub async fn token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() + self.refresh_margin < token.expires_at {
                return Ok(token.value.clone());
            }
            debug!("relay token near expiry, refreshing");
        }

        let token = self.login().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    /// Drop the cached token
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    /// Run `f` with a valid token. On 401 the session logs in again and
    /// retries once; a second rejection is `RelayAuthenticationFailed`.
    pub async fn call<R, F, Fut>(&self, f: F) -> Result<R>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let token = self.token().await?;
        match f(token).await {
            Err(e) if is_unauthorized(&e) => {
                warn!("relay rejected token, re-authenticating");
                self.invalidate().await;
                let token = self.token().await?;
                match f(token).await {
                    Err(e) if is_unauthorized(&e) => Err(ShroudError::RelayAuthenticationFailed(
                        "token rejected after re-login".into(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn login(&self) -> Result<Token> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ShroudError::RelayAuthenticationFailed("no relay API key configured".into())
        })?;

        let response = self.transport.login(api_key).await.map_err(|e| match e {
            ShroudError::Relay { status: 401 | 403, message } => {
                ShroudError::RelayAuthenticationFailed(message)
            }
            other => other,
        })?;

        info!(expires_in = response.expires_in, "authenticated with relay");
        Ok(Token {
            value: response.token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        })
    }
}
