use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod bot_api;

pub use self::bot_api::BotApiSession;

/// Transport failures, split so the relay can tell a recoverable condition
/// (wrong destination-id encoding, missing local asset, rejected payload)
/// from a real send failure.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Destination chat id invalid: {0}")]
    InvalidDestination(i64),

    #[error("Media asset not found: {}", .0.display())]
    MissingAsset(PathBuf),

    #[error("Media payload rejected: {0}")]
    PayloadRejected(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingMediaKind {
    Photo,
    Video,
    Voice,
    Document,
    /// Link-preview pseudo-media; never re-sendable.
    WebPreview,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMedia {
    pub kind: IncomingMediaKind,
    /// Transport handle for re-sending the original media.
    pub file_id: String,
}

impl IncomingMedia {
    /// Whether the attachment can be re-sent to another chat as media.
    pub fn is_supported(&self) -> bool {
        matches!(
            self.kind,
            IncomingMediaKind::Photo | IncomingMediaKind::Video | IncomingMediaKind::Voice
        )
    }

    /// Displayable media as opposed to a link preview.
    pub fn is_displayable(&self) -> bool {
        self.kind != IncomingMediaKind::WebPreview
    }
}

/// One inbound chat message as exposed by the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub media: Option<IncomingMedia>,
    pub reply_to_msg_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub chat_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Outgoing media payload: either a local replacement asset or the incoming
/// message's own media re-sent by handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMedia {
    LocalFile(PathBuf),
    Existing {
        kind: IncomingMediaKind,
        file_id: String,
    },
}

/// A live per-account chat session. One worker process owns exactly one.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send_text(
        &self,
        dest_chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<SentMessage, TransportError>;

    async fn send_media(
        &self,
        dest_chat_id: i64,
        media: &OutgoingMedia,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<SentMessage, TransportError>;

    /// Best-effort entity lookup for audit-log titles.
    async fn chat_title(&self, chat_id: i64) -> Result<Option<String>, TransportError>;

    /// Block until the next chat event. `Ok(None)` means the remote side
    /// disconnected and the worker should wind down.
    async fn next_event(&self) -> Result<Option<ChatEvent>, TransportError>;
}
