//! Bearer-token validation.
//!
//! The authentication layer knows nothing about how tokens are issued or
//! stored. It hands the token to a [`TokenValidator`] and acts on the verdict.
//! [`MemoryTokenStore`] is the in-process implementation used by the binary
//! and the tests; a database-backed validator implements the same trait.

use std::future::{ready, Future};
use std::pin::Pin;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

use crate::identity::User;

/// Length of a plaintext token: 16 random bytes, base32 without padding.
pub const TOKEN_LENGTH: usize = 26;

/// Future returned by [`TokenValidator::validate`].
pub type Validation<'a> = Pin<Box<dyn Future<Output = Result<User, TokenError>> + Send + 'a>>;

/// Why a well-formed bearer token was not accepted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token does not have the expected format")]
    Malformed,

    #[error("token is not recognised")]
    Unknown,

    #[error("token has expired")]
    Expired,

    #[error("token validation unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a bearer token into the user it was issued to.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate<'a>(&'a self, token: &'a str) -> Validation<'a>;
}

struct Entry {
    user: User,
    expires_at: Instant,
}

/// Tokens held in memory, keyed by plaintext.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<String, Entry>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` for `user`, valid for `ttl` from now.
    pub fn insert(&self, token: impl Into<String>, user: User, ttl: Duration) {
        self.tokens.insert(token.into(), Entry { user, expires_at: Instant::now() + ttl });
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn check(&self, token: &str) -> Result<User, TokenError> {
        if !is_plaintext_token(token) {
            return Err(TokenError::Malformed);
        }
        let entry = self.tokens.get(token).ok_or(TokenError::Unknown)?;
        if entry.expires_at <= Instant::now() {
            return Err(TokenError::Expired);
        }
        Ok(entry.user.clone())
    }
}

impl TokenValidator for MemoryTokenStore {
    fn validate<'a>(&'a self, token: &'a str) -> Validation<'a> {
        Box::pin(ready(self.check(token)))
    }
}

/// Upper-case RFC 4648 base32 alphabet, exactly [`TOKEN_LENGTH`] characters.
pub fn is_plaintext_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH
        && token.bytes().all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    #[test]
    fn plaintext_format() {
        assert!(is_plaintext_token(TOKEN));
        assert!(is_plaintext_token("234567ABCDEFGHIJKLMNOPQRST"));
        assert!(!is_plaintext_token("abcdefghijklmnopqrstuvwxyz"));
        assert!(!is_plaintext_token("ABCDEFGHIJKLMNOPQRSTUVWXY"));
        assert!(!is_plaintext_token("ABCDEFGHIJKLMNOPQRSTUVWXY1"));
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_known_token_until_expiry() {
        let store = MemoryTokenStore::new();
        store.insert(TOKEN, User::new(1, "alice@example.com"), Duration::from_secs(60));

        assert_eq!(store.validate(TOKEN).await.unwrap().id, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.validate(TOKEN).await, Err(TokenError::Expired));
    }

    #[tokio::test]
    async fn rejects_unknown_and_malformed() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.validate(TOKEN).await, Err(TokenError::Unknown));
        assert_eq!(store.validate("not-a-token").await, Err(TokenError::Malformed));
    }

    #[tokio::test]
    async fn revoked_tokens_stop_validating() {
        let store = MemoryTokenStore::new();
        store.insert(TOKEN, User::new(1, "alice@example.com"), Duration::from_secs(60));
        assert!(store.revoke(TOKEN));
        assert!(store.is_empty());
        assert_eq!(store.validate(TOKEN).await, Err(TokenError::Unknown));
    }
}
