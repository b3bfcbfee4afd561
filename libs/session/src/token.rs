//! Access token supply and refresh.
//!
//! [`SharedTokens`] caches the current token and collapses concurrent refresh
//! requests: callers that ask for a refresh while one is already running wait
//! for it and share its result instead of issuing their own.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::TokenError;

/// Supplies access tokens to registry clients.
#[async_trait]
pub trait TokenSupplier: Send + Sync {
    /// Current access token.
    async fn get_token(&self) -> Result<String, TokenError>;

    /// Obtain a fresh access token. Safe to call concurrently.
    async fn refresh_token(&self) -> Result<(), TokenError>;
}

/// Source of tokens behind [`SharedTokens`].
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// The stored token, without contacting anything.
    async fn stored(&self) -> Result<String, TokenError>;

    /// Exchange credentials for a new token.
    async fn issue(&self) -> Result<String, TokenError>;
}

/// Token cache over an issuer, with coalesced refreshes.
pub struct SharedTokens<I> {
    issuer: I,
    token: RwLock<Option<String>>,
    refresh_lock: Mutex<()>,
    /// Number of completed refreshes.
    generation: AtomicU64,
}

impl<I: TokenIssuer> SharedTokens<I> {
    pub fn new(issuer: I) -> Self {
        Self {
            issuer,
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of refreshes that actually reached the issuer.
    pub fn refresh_count(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn issuer(&self) -> &I {
        &self.issuer
    }
}

#[async_trait]
impl<I: TokenIssuer> TokenSupplier for SharedTokens<I> {
    async fn get_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        // Loading the stored token may itself refresh it, so it is serialized
        // with refreshes.
        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let token = self.issuer.stored().await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn refresh_token(&self) -> Result<(), TokenError> {
        let seen = self.generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::SeqCst) != seen {
            debug!("Token refreshed by a concurrent caller");
            return Ok(());
        }

        let token = self.issuer.issue().await?;
        *self.token.write().await = Some(token);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "Access token refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    struct SlowIssuer {
        issued: AtomicU32,
    }

    #[async_trait]
    impl TokenIssuer for SlowIssuer {
        async fn stored(&self) -> Result<String, TokenError> {
            Ok("stored".to_string())
        }

        async fn issue(&self) -> Result<String, TokenError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("fresh-{n}"))
        }
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_collapse() {
        let tokens = Arc::new(SharedTokens::new(SlowIssuer {
            issued: AtomicU32::new(0),
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tokens = tokens.clone();
            handles.push(tokio::spawn(async move { tokens.refresh_token().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(tokens.refresh_count(), 1);
        assert_eq!(tokens.get_token().await.unwrap(), "fresh-1");
    }

    #[tokio::test]
    async fn test_get_token_uses_stored_until_refresh() {
        let tokens = SharedTokens::new(SlowIssuer {
            issued: AtomicU32::new(0),
        });
        assert_eq!(tokens.get_token().await.unwrap(), "stored");

        tokens.refresh_token().await.unwrap();
        tokens.refresh_token().await.unwrap();
        assert_eq!(tokens.refresh_count(), 2);
        assert_eq!(tokens.get_token().await.unwrap(), "fresh-2");
    }

    /// Issuer whose stored token has expired, so loading it exchanges it.
    struct ExpiredIssuer {
        loads: AtomicU32,
    }

    #[async_trait]
    impl TokenIssuer for ExpiredIssuer {
        async fn stored(&self) -> Result<String, TokenError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("exchanged-{n}"))
        }

        async fn issue(&self) -> Result<String, TokenError> {
            Ok("fresh".to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_loads_collapse() {
        let tokens = Arc::new(SharedTokens::new(ExpiredIssuer {
            loads: AtomicU32::new(0),
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tokens = tokens.clone();
            handles.push(tokio::spawn(async move { tokens.get_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "exchanged-1");
        }

        assert_eq!(tokens.issuer().loads.load(Ordering::SeqCst), 1);
    }
}
