//! Per-account nonce bookkeeping.

use std::future::Future;

use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::AppError;

/// Caches the next nonce of one sending account.
///
/// The first reservation seeds the cache from the node (the pending
/// transaction count); later reservations hand out consecutive values without
/// another round trip. The mutex is held across the fetch so concurrent
/// callers never observe the same nonce.
#[derive(Debug, Default)]
pub struct NonceManager {
    next: Mutex<Option<u64>>,
}

impl NonceManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next nonce, seeding the cache with `fetch` when empty.
    pub async fn reserve<F, Fut>(&self, fetch: F) -> Result<u64, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, AppError>>,
    {
        let mut next = self.next.lock().await;
        let nonce = match *next {
            Some(nonce) => nonce,
            None => {
                let fetched = fetch().await?;
                debug!(nonce = fetched, "Seeded nonce from node");
                fetched
            }
        };
        *next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Forget the cached nonce; the next reservation resyncs with the node.
    pub async fn reset(&self) {
        *self.next.lock().await = None;
    }

    /// Next nonce that would be handed out, if known.
    pub async fn peek(&self) -> Option<u64> {
        *self.next.lock().await
    }
}
