//! Chat endpoint request types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single turn of conversation history supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TurnInput {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// The content of the turn.
    pub content: String,
}

/// Request body for `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// Conversation history, oldest first; the last entry is the message
    /// being sent.  A missing or empty array is rejected.
    #[serde(default)]
    pub messages: Vec<TurnInput>,
}
