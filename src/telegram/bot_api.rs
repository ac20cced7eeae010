//! Telegram Bot API session over HTTP long-polling.
//!
//! The session handle is a small JSON file holding the bot token and the
//! last confirmed update offset. The offset makes the file mutable state:
//! two processes long-polling the same token conflict (the API answers 409),
//! which is why workers operate on a private copy of the session file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    ChatEvent, IncomingMedia, IncomingMediaKind, OutgoingMedia, SentMessage, Session,
    TransportError,
};
use crate::config::{TelegramConfig, WorkerConfig};

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm"];
const VOICE_EXTENSIONS: &[&str] = &["ogg", "oga", "opus"];

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    bot_token: String,
    #[serde(default)]
    update_offset: i64,
}

impl SessionFile {
    fn load(path: &Path) -> Result<Self, TransportError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransportError::Auth(format!("session file {} unreadable: {e}", path.display()))
        })?;
        let session: SessionFile = serde_json::from_str(&content).map_err(|e| {
            TransportError::Auth(format!("session file {} invalid: {e}", path.display()))
        })?;
        if session.bot_token.trim().is_empty() {
            return Err(TransportError::Auth(format!(
                "session file {} has no bot token",
                path.display()
            )));
        }
        Ok(session)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiFile {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: i64,
    date: i64,
    chat: ApiChat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    photo: Option<Vec<ApiFile>>,
    #[serde(default)]
    video: Option<ApiFile>,
    #[serde(default)]
    voice: Option<ApiFile>,
    #[serde(default)]
    document: Option<ApiFile>,
    #[serde(default)]
    reply_to_message: Option<Box<ApiMessage>>,
}

#[derive(Debug, Deserialize)]
struct ApiMessageId {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    channel_post: Option<ApiMessage>,
}

impl ApiUpdate {
    fn into_event(self) -> Option<ChatEvent> {
        let message = self.message.or(self.channel_post)?;

        // Classification priority: voice > video > photo > document.
        let media = if let Some(voice) = message.voice {
            Some(IncomingMedia {
                kind: IncomingMediaKind::Voice,
                file_id: voice.file_id,
            })
        } else if let Some(video) = message.video {
            Some(IncomingMedia {
                kind: IncomingMediaKind::Video,
                file_id: video.file_id,
            })
        } else if let Some(sizes) = message.photo {
            // Sizes are ordered smallest first; forward the largest.
            sizes.into_iter().next_back().map(|size| IncomingMedia {
                kind: IncomingMediaKind::Photo,
                file_id: size.file_id,
            })
        } else {
            message.document.map(|document| IncomingMedia {
                kind: IncomingMediaKind::Document,
                file_id: document.file_id,
            })
        };

        Some(ChatEvent {
            chat_id: message.chat.id,
            message_id: message.message_id,
            text: message.text.or(message.caption).unwrap_or_default(),
            media,
            reply_to_msg_id: message.reply_to_message.map(|reply| reply.message_id),
            timestamp: chrono::DateTime::from_timestamp(message.date, 0)
                .unwrap_or_else(chrono::Utc::now),
            chat_title: message.chat.title.or(message.chat.first_name),
        })
    }
}

fn classify_api_error(code: i64, description: String, dest: Option<i64>) -> TransportError {
    let lowered = description.to_lowercase();
    if let Some(dest) = dest
        && (lowered.contains("chat not found")
            || lowered.contains("chat_id is empty")
            || lowered.contains("peer_id_invalid"))
    {
        return TransportError::InvalidDestination(dest);
    }
    if lowered.contains("wrong file identifier")
        || lowered.contains("wrong remote file")
        || lowered.contains("failed to get http url content")
        || lowered.contains("type of file mismatch")
        || lowered.contains("file must be non-empty")
    {
        return TransportError::PayloadRejected(description);
    }
    if code == 401 || lowered.contains("unauthorized") {
        return TransportError::Auth(description);
    }
    if code == 409 || lowered.contains("terminated by other getupdates") {
        return TransportError::Session(description);
    }
    TransportError::Api { code, description }
}

/// Send method and multipart field name for a local asset, by extension.
fn upload_method(path: &Path) -> (&'static str, &'static str) {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if PHOTO_EXTENSIONS.contains(&extension.as_str()) {
        ("sendPhoto", "photo")
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        ("sendVideo", "video")
    } else if VOICE_EXTENSIONS.contains(&extension.as_str()) {
        ("sendVoice", "voice")
    } else {
        ("sendDocument", "document")
    }
}

fn resend_method(kind: IncomingMediaKind) -> (&'static str, &'static str) {
    match kind {
        IncomingMediaKind::Photo => ("sendPhoto", "photo"),
        IncomingMediaKind::Video => ("sendVideo", "video"),
        IncomingMediaKind::Voice => ("sendVoice", "voice"),
        IncomingMediaKind::Document | IncomingMediaKind::WebPreview => {
            ("sendDocument", "document")
        }
    }
}

struct PollState {
    offset: i64,
    queue: VecDeque<ChatEvent>,
}

pub struct BotApiSession {
    http: reqwest::Client,
    api_base: String,
    token: SecretString,
    session_path: PathBuf,
    poll_timeout: u64,
    state: tokio::sync::Mutex<PollState>,
}

impl BotApiSession {
    /// Open the session file and validate the token against the API.
    /// Credential problems are fatal here, before any event is consumed.
    pub async fn connect(
        telegram: &TelegramConfig,
        worker: &WorkerConfig,
        session_path: &Path,
    ) -> Result<Self, TransportError> {
        let file = SessionFile::load(session_path)?;

        let http = reqwest::Client::builder()
            .user_agent("telegram-relay")
            .build()
            .map_err(|e| TransportError::Session(format!("failed to build HTTP client: {e}")))?;

        let session = Self {
            http,
            api_base: telegram.api_base_url.trim_end_matches('/').to_string(),
            token: SecretString::from(file.bot_token),
            session_path: session_path.to_path_buf(),
            poll_timeout: worker.poll_timeout_seconds,
            state: tokio::sync::Mutex::new(PollState {
                offset: file.update_offset,
                queue: VecDeque::new(),
            }),
        };

        let me: ApiUser = session.call("getMe", &json!({}), None, None).await?;
        debug!(bot_id = me.id, username = ?me.username, "bot session authorized");
        Ok(session)
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_base,
            self.token.expose_secret(),
            method
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
        dest_hint: Option<i64>,
        timeout: Option<Duration>,
    ) -> Result<T, TransportError> {
        let mut request = self.http.post(self.method_url(method)).json(payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        Self::handle_response(response, dest_hint).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
        dest_hint: Option<i64>,
    ) -> Result<T, TransportError> {
        let status = response.status();
        let body: ApiResponse<T> = response.json().await?;
        if body.ok {
            body.result
                .ok_or_else(|| TransportError::Session("API response missing result".to_string()))
        } else {
            Err(classify_api_error(
                body.error_code.unwrap_or_else(|| status.as_u16() as i64),
                body.description.unwrap_or_default(),
                dest_hint,
            ))
        }
    }

    async fn fetch_updates(&self) -> Result<(), TransportError> {
        let offset = self.state.lock().await.offset;
        let payload = json!({
            "offset": offset,
            "timeout": self.poll_timeout,
            "allowed_updates": ["message", "channel_post"],
        });
        let updates: Vec<ApiUpdate> = self
            .call(
                "getUpdates",
                &payload,
                None,
                Some(Duration::from_secs(self.poll_timeout + 10)),
            )
            .await?;

        let mut state = self.state.lock().await;
        for update in updates {
            state.offset = state.offset.max(update.update_id + 1);
            if let Some(event) = update.into_event() {
                state.queue.push_back(event);
            }
        }
        let offset = state.offset;
        drop(state);

        self.persist_offset(offset);
        Ok(())
    }

    /// Best-effort: losing the offset means re-reading a few updates after a
    /// restart, not losing messages.
    fn persist_offset(&self, offset: i64) {
        let file = SessionFile {
            bot_token: self.token.expose_secret().to_string(),
            update_offset: offset,
        };
        let serialized = match serde_json::to_string_pretty(&file) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("failed to serialize session file: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.session_path, serialized) {
            warn!(
                "failed to persist session file {}: {e}",
                self.session_path.display()
            );
        }
    }

    async fn send_local_file(
        &self,
        dest_chat_id: i64,
        path: &Path,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<SentMessage, TransportError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| TransportError::MissingAsset(path.to_path_buf()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("asset")
            .to_string();

        let (method, field) = upload_method(path);
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", dest_chat_id.to_string())
            .text("caption", caption.to_string())
            .part(field, part);
        if let Some(reply_to) = reply_to {
            form = form.text("reply_to_message_id", reply_to.to_string());
        }

        let response = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await?;
        let sent: ApiMessageId = Self::handle_response(response, Some(dest_chat_id)).await?;
        Ok(SentMessage {
            message_id: sent.message_id,
        })
    }
}

#[async_trait]
impl Session for BotApiSession {
    async fn send_text(
        &self,
        dest_chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<SentMessage, TransportError> {
        let mut payload = json!({
            "chat_id": dest_chat_id,
            "text": text,
        });
        if let Some(reply_to) = reply_to {
            payload["reply_to_message_id"] = json!(reply_to);
        }
        let sent: ApiMessageId = self
            .call("sendMessage", &payload, Some(dest_chat_id), None)
            .await?;
        Ok(SentMessage {
            message_id: sent.message_id,
        })
    }

    async fn send_media(
        &self,
        dest_chat_id: i64,
        media: &OutgoingMedia,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<SentMessage, TransportError> {
        match media {
            OutgoingMedia::LocalFile(path) => {
                self.send_local_file(dest_chat_id, path, caption, reply_to)
                    .await
            }
            OutgoingMedia::Existing { kind, file_id } => {
                let (method, field) = resend_method(*kind);
                let mut payload = json!({
                    "chat_id": dest_chat_id,
                    "caption": caption,
                });
                payload[field] = json!(file_id);
                if let Some(reply_to) = reply_to {
                    payload["reply_to_message_id"] = json!(reply_to);
                }
                let sent: ApiMessageId =
                    self.call(method, &payload, Some(dest_chat_id), None).await?;
                Ok(SentMessage {
                    message_id: sent.message_id,
                })
            }
        }
    }

    async fn chat_title(&self, chat_id: i64) -> Result<Option<String>, TransportError> {
        let chat: ApiChat = self
            .call("getChat", &json!({"chat_id": chat_id}), Some(chat_id), None)
            .await?;
        Ok(chat.title.or(chat.first_name))
    }

    async fn next_event(&self) -> Result<Option<ChatEvent>, TransportError> {
        loop {
            if let Some(event) = self.state.lock().await.queue.pop_front() {
                return Ok(Some(event));
            }
            self.fetch_updates().await?;
        }
    }
}
