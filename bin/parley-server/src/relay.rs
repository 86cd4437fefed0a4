//! The streaming relay.
//!
//! A single consuming task sits between the completion provider's chunk
//! channel and the two sinks that must each observe every chunk exactly once
//! and in the same order: the caller's SSE channel and the in-memory
//! accumulator that becomes the persisted assistant turn.
//!
//! Lifecycle of one run:
//! 1. Forward each raw chunk payload to the caller immediately, then parse
//!    its delta and extend the accumulator.  A malformed chunk is logged and
//!    skipped; it never aborts the stream.
//! 2. On the terminal marker (or upstream closure), forward `[DONE]` and
//!    close the caller's channel.
//! 3. Only then append the accumulated text as the assistant turn.  A store
//!    failure here is logged, never re-surfaced: the caller already saw the
//!    rendered text.
//!
//! A caller that disconnects mid-stream stops forwarding but not
//! accumulation: the generation cost was already incurred, so whatever was
//! produced is still persisted.

use parley_provider::{StreamEvent, delta_from_payload};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::db::{MessageStore, Role};

/// Terminal marker forwarded to the caller after the last chunk.
pub const DONE_MARKER: &str = "[DONE]";

/// Outcome of one relay run, for logging.
#[derive(Debug)]
pub struct RelaySummary {
    /// Chunks delivered to the caller before any disconnect.
    pub forwarded: usize,
    /// Id of the persisted assistant turn, if any text accumulated.
    pub persisted: Option<String>,
}

/// Drive one completion stream to completion.
pub async fn run<S: MessageStore>(
    store: &S,
    owner: &str,
    mut upstream: mpsc::Receiver<StreamEvent>,
    client: mpsc::Sender<String>,
) -> RelaySummary {
    let mut accumulated = String::new();
    let mut forwarded = 0usize;
    let mut client = Some(client);

    while let Some(event) = upstream.recv().await {
        let payload = match event {
            StreamEvent::Data(payload) => payload,
            StreamEvent::Done => break,
        };

        if let Some(tx) = &client {
            if tx.send(payload.clone()).await.is_err() {
                debug!("caller disconnected; continuing to accumulate");
                client = None;
            } else {
                forwarded += 1;
            }
        }

        match delta_from_payload(&payload) {
            Ok(Some(delta)) => accumulated.push_str(&delta),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "skipping malformed chunk"),
        }
    }

    // Close the caller's channel before the final append so a slow database
    // write cannot hold the response open.
    if let Some(tx) = client.take() {
        let _ = tx.send(DONE_MARKER.to_string()).await;
    }

    let text = accumulated.trim();
    let persisted = if text.is_empty() {
        None
    } else {
        match store.append(owner, text, Role::Assistant).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "failed to persist assistant reply");
                None
            }
        }
    };

    info!(forwarded, persisted = persisted.is_some(), "stream relay finished");
    RelaySummary { forwarded, persisted }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
