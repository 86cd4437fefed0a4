//! Message persistence layer.
//!
//! [`MessageStore`] defines the interface for the per-user append-only
//! message log.  The default implementation is [`sqlite::SqliteStore`].  To
//! swap to another database (Postgres, MySQL, …), implement [`MessageStore`]
//! for your new type and change the concrete type in
//! [`crate::state::AppState`].
//!
//! The owner is a mandatory parameter on every operation: a cross-user read
//! or write is not expressible at this layer.
//!
//! All trait methods use `impl Future` in their signatures (stable since Rust
//! 1.75) so no extra `async-trait` crate is required.

pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};
use parley_cipher::CipherError;

/// Content substituted for a row whose payload cannot be decrypted.  One
/// corrupted row degrades to this value instead of failing the whole listing.
pub const DECRYPTION_SENTINEL: &str = "[decryption failed]";

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse the lowercase wire form; anything else is rejected.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message row in the `messages` table, decrypted for the owner.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    /// Assigned by the store at insertion; defines the order of the log.
    pub created_at: DateTime<Utc>,
}

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Trait for the per-user message log.
pub trait MessageStore: Send + Sync + 'static {
    /// Encrypt `content` and append it to `owner`'s log.  Returns the id of
    /// the new row.  A persistence failure surfaces as an error; the message
    /// is never silently dropped.
    fn append(
        &self,
        owner: &str,
        content: &str,
        role: Role,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// All of `owner`'s messages in ascending creation order, decrypted.
    /// A row that fails to decrypt carries [`DECRYPTION_SENTINEL`] as its
    /// content; the rest of the listing is unaffected.
    fn list(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, StoreError>> + Send;
}
