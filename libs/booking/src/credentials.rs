//! Namespaced views over the shared credential cache
//!
//! One-time login codes and meeting keys live in the same cache under
//! different key prefixes, each with its own time-to-live.

use common::cache::CredentialCache;
use common::error::{CacheError, CacheResult};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::crypto;
use crate::error::{BookingError, BookingResult};
use crate::models::UserId;

/// Cache keys sharing a prefix and a TTL
#[derive(Clone)]
pub struct CredentialNamespace {
    cache: Arc<dyn CredentialCache>,
    prefix: &'static str,
    ttl: Duration,
}

impl CredentialNamespace {
    pub fn new(cache: Arc<dyn CredentialCache>, prefix: &'static str, ttl: Duration) -> Self {
        Self { cache, prefix, ttl }
    }

    pub fn key(&self, id: impl Display) -> String {
        format!("{}:{}", self.prefix, id)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a value, replacing any earlier one and restarting its TTL
    pub async fn put(&self, id: impl Display, value: &str) -> CacheResult<()> {
        self.cache.set(&self.key(id), value, self.ttl).await
    }

    /// Read without consuming; absent or expired entries are `Missing`
    pub async fn fetch(&self, id: impl Display) -> CacheResult<String> {
        let key = self.key(id);
        self.cache.get(&key).await?.ok_or(CacheError::Missing(key))
    }

    /// Remove the entry only if it still holds `expected`; only one
    /// concurrent caller gets `true`, and a newer value is left untouched
    pub async fn consume_if(&self, id: impl Display, expected: &str) -> CacheResult<bool> {
        self.cache.take_if(&self.key(id), expected).await
    }
}

/// Digits in a one-time code
pub const ONE_TIME_CODE_DIGITS: u32 = 6;

/// Single-use numeric codes keyed by user
#[derive(Clone)]
pub struct OneTimeCodes {
    codes: CredentialNamespace,
}

impl OneTimeCodes {
    pub fn new(cache: Arc<dyn CredentialCache>, ttl: Duration) -> Self {
        Self {
            codes: CredentialNamespace::new(cache, "otp", ttl),
        }
    }

    /// Issue a fresh code, invalidating any earlier one for the user
    pub async fn issue(&self, user_id: UserId) -> BookingResult<String> {
        let code = crypto::generate_numeric_code(ONE_TIME_CODE_DIGITS);
        self.codes.put(user_id, &code).await?;
        Ok(code)
    }

    /// Check a code and consume it on success
    ///
    /// A mismatch leaves the stored code in place so the user can retry.
    pub async fn verify(&self, user_id: UserId, code: &str) -> BookingResult<()> {
        let stored = self.codes.fetch(user_id).await?;
        if stored != code {
            warn!("Rejected one-time code for user {}", user_id);
            return Err(BookingError::InvalidCode);
        }

        // Lost to a concurrent verify, or a new code was issued meanwhile
        if !self.codes.consume_if(user_id, code).await? {
            return Err(BookingError::InvalidCode);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Resource;
    use common::cache::MemoryCache;
    use uuid::Uuid;

    fn codes(ttl: Duration) -> OneTimeCodes {
        OneTimeCodes::new(Arc::new(MemoryCache::new()), ttl)
    }

    #[tokio::test]
    async fn code_is_single_use() -> BookingResult<()> {
        let codes = codes(Duration::from_secs(60));
        let user = Uuid::new_v4();
        let code = codes.issue(user).await?;

        codes.verify(user, &code).await?;
        let second = codes.verify(user, &code).await;
        assert!(matches!(
            second,
            Err(BookingError::NotFound(Resource::Credential(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_code_keeps_entry_for_retry() -> BookingResult<()> {
        let codes = codes(Duration::from_secs(60));
        let user = Uuid::new_v4();
        let code = codes.issue(user).await?;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        assert!(matches!(
            codes.verify(user, wrong).await,
            Err(BookingError::InvalidCode)
        ));
        codes.verify(user, &code).await
    }

    #[tokio::test]
    async fn reissue_invalidates_previous_code() -> BookingResult<()> {
        let codes = codes(Duration::from_secs(60));
        let user = Uuid::new_v4();
        let first = codes.issue(user).await?;
        let mut second = codes.issue(user).await?;
        while second == first {
            second = codes.issue(user).await?;
        }

        assert!(codes.verify(user, &first).await.is_err());
        codes.verify(user, &second).await
    }

    #[tokio::test]
    async fn expired_code_is_not_found() -> BookingResult<()> {
        let codes = codes(Duration::from_millis(20));
        let user = Uuid::new_v4();
        let code = codes.issue(user).await?;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(matches!(
            codes.verify(user, &code).await,
            Err(BookingError::NotFound(Resource::Credential(key))) if key == format!("otp:{user}")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_verify_has_one_winner() -> BookingResult<()> {
        let codes = codes(Duration::from_secs(60));
        let user = Uuid::new_v4();
        let code = codes.issue(user).await?;

        let (first, second) = tokio::join!(codes.verify(user, &code), codes.verify(user, &code));
        assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() -> CacheResult<()> {
        let cache: Arc<dyn CredentialCache> = Arc::new(MemoryCache::new());
        let otp = CredentialNamespace::new(cache.clone(), "otp", Duration::from_secs(60));
        let meeting = CredentialNamespace::new(cache, "meeting", Duration::from_secs(60));
        let id = Uuid::new_v4();

        otp.put(id, "123456").await?;
        assert!(matches!(meeting.fetch(id).await, Err(CacheError::Missing(_))));
        assert_eq!(otp.fetch(id).await?, "123456");
        Ok(())
    }
}
