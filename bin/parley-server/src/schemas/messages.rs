//! Message history request / response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::MessageRecord;

/// A decrypted message as returned to its owner.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageView {
    pub id: String,
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl From<MessageRecord> for MessageView {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            role: record.role.as_str().to_owned(),
            content: record.content,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

/// Response body for `GET /messages`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageListResponse {
    pub messages: Vec<MessageView>,
    pub count: usize,
}

/// Request body for `POST /messages`.
///
/// The owner of the new message is always the authenticated caller; there is
/// deliberately no user-id field here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaveMessageRequest {
    #[serde(default)]
    pub content: String,
    /// `"user"` or `"assistant"`.
    #[serde(default)]
    pub role: String,
}

/// Response body for `POST /messages`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaveMessageResponse {
    pub id: String,
}
