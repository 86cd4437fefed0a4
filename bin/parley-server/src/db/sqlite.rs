//! SQLite implementation of [`MessageStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature.  Migrations are run automatically
//! on startup via [`SqliteStore::connect`].
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path **at compile time**
//! relative to `CARGO_MANIFEST_DIR` (the crate root), so the directory is
//! embedded into the binary.  The database file location is determined at
//! runtime by the `PARLEY_DATABASE_URL` environment variable and is **not**
//! related to the current working directory at runtime.
//!
//! # Queries
//!
//! The `sqlx::query` (runtime-verified) form is used deliberately so that no
//! `DATABASE_URL` environment variable is needed at compile time.

use chrono::Utc;
use parley_cipher::{EncryptedPayload, MessageCipher};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{DECRYPTION_SENTINEL, MessageRecord, MessageStore, Role, StoreError};

/// SQLite-backed message store.
///
/// Holds the message cipher alongside the pool: content is encrypted on the
/// way in and decrypted on the way out, so plaintext never reaches a row.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    cipher: MessageCipher,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending
    /// migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://parley.db"`
    /// or `"sqlite://…?mode=rwc"` to create the file on first start.
    pub async fn connect(url: &str, cipher: MessageCipher) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(url).await?;
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, cipher })
    }
}

impl MessageStore for SqliteStore {
    async fn append(&self, owner: &str, content: &str, role: Role) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let payload = self.cipher.encrypt(content)?;
        let encrypted = serde_json::to_string(&payload)?;
        let created_at = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO messages (id, user_id, role, encrypted_content, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(owner)
        .bind(role.as_str())
        .bind(&encrypted)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list(&self, owner: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, user_id, role, encrypted_content, created_at \
             FROM messages WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, user_id, role, encrypted, created_at)| {
                let content = decrypt_row(&self.cipher, &id, &encrypted);
                MessageRecord {
                    role: Role::parse(&role).unwrap_or_else(|| {
                        tracing::warn!(message_id = %id, raw = %role, "unknown role in row; treating as user");
                        Role::User
                    }),
                    created_at: created_at.parse().unwrap_or_else(|e: chrono::ParseError| {
                        tracing::warn!(raw = %created_at, error = %e, "failed to parse message created_at; using now");
                        Utc::now()
                    }),
                    id,
                    user_id,
                    content,
                }
            })
            .collect())
    }
}

/// Decrypt one row's payload, degrading to the sentinel on any failure so a
/// single corrupted row cannot block retrieval of the rest of the history.
fn decrypt_row(cipher: &MessageCipher, id: &str, encrypted: &str) -> String {
    let payload = match serde_json::from_str::<EncryptedPayload>(encrypted) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(message_id = %id, error = %e, "stored payload is malformed");
            return DECRYPTION_SENTINEL.to_string();
        }
    };
    match cipher.decrypt(&payload) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(message_id = %id, error = %e, "failed to decrypt message");
            DECRYPTION_SENTINEL.to_string()
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
