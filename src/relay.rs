use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chat_id::{alternate_chat_id, candidate_ids};
use crate::db::{
    AuditLogSink, ChannelMapping, DatabaseError, MessageLogEntry, ReplyIndexEntry, ReplyIndexStore,
};
use crate::rules::{
    TransformContext, apply_transforms, classify_media, passes_filters, passes_schedule,
    pick_media_replacement,
};
use crate::telegram::{ChatEvent, OutgoingMedia, SentMessage, Session, TransportError};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Outcome of relaying one event to one mapping, logged at a single call
/// site instead of scattered through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Rejected by filters or schedule, or every destination candidate was
    /// invalid.
    Skipped,
    /// Delivered and every side effect succeeded.
    Ok,
    /// Delivered, but a best-effort side effect (title lookup, audit write)
    /// failed.
    Degraded,
}

impl RelayOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Skipped => "skipped",
            RelayOutcome::Ok => "ok",
            RelayOutcome::Degraded => "degraded",
        }
    }
}

/// Per-worker relay pipeline: mapping lookup → filter → schedule →
/// transform → reply resolution → delivery with fallback → index write →
/// audit write. Holds the immutable mapping snapshot for the worker's
/// lifetime.
pub struct RelayHandler {
    user_id: i64,
    mappings: Vec<ChannelMapping>,
    /// Source chat id (both encodings) → indices into `mappings`.
    by_source: HashMap<i64, Vec<usize>>,
    configured_sources: Vec<i64>,
    reply_index: Arc<dyn ReplyIndexStore>,
    audit_log: Arc<dyn AuditLogSink>,
    logged_unknown: Mutex<HashSet<i64>>,
}

impl RelayHandler {
    pub fn new(
        user_id: i64,
        mappings: Vec<ChannelMapping>,
        reply_index: Arc<dyn ReplyIndexStore>,
        audit_log: Arc<dyn AuditLogSink>,
    ) -> Self {
        let mut by_source: HashMap<i64, Vec<usize>> = HashMap::new();
        for (index, mapping) in mappings.iter().enumerate() {
            for chat_id in candidate_ids(mapping.source_chat_id) {
                by_source.entry(chat_id).or_default().push(index);
            }
        }
        let mut configured_sources: Vec<i64> = by_source.keys().copied().collect();
        configured_sources.sort_unstable();

        Self {
            user_id,
            mappings,
            by_source,
            configured_sources,
            reply_index,
            audit_log,
            logged_unknown: Mutex::new(HashSet::new()),
        }
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// Fan one incoming event out to every matched mapping. Recoverable
    /// delivery problems are handled inline; anything else propagates and
    /// takes the worker down.
    pub async fn handle_event(
        &self,
        session: &dyn Session,
        event: &ChatEvent,
    ) -> Result<(), RelayError> {
        let mut matched: Vec<usize> = Vec::new();
        for chat_id in candidate_ids(event.chat_id) {
            if let Some(indices) = self.by_source.get(&chat_id) {
                matched.extend_from_slice(indices);
            }
        }
        if matched.is_empty() {
            if self.logged_unknown.lock().insert(event.chat_id) {
                info!(
                    "message from chat_id={} has no mapping (configured: {:?}); \
                     verify the source chat id matches your mapping",
                    event.chat_id, self.configured_sources
                );
            }
            return Ok(());
        }

        // Both encodings of one source register the same mapping twice.
        let mut seen: HashSet<i64> = HashSet::new();
        for index in matched {
            let mapping = &self.mappings[index];
            if !seen.insert(mapping.id) {
                continue;
            }
            let outcome = self.relay_to_mapping(session, event, mapping).await?;
            match outcome {
                RelayOutcome::Skipped => {
                    debug!(
                        mapping_id = mapping.id,
                        msg_id = event.message_id,
                        "message not forwarded"
                    );
                }
                RelayOutcome::Ok | RelayOutcome::Degraded => {
                    info!(
                        mapping_id = mapping.id,
                        msg_id = event.message_id,
                        source_chat_id = event.chat_id,
                        dest_chat_id = mapping.dest_chat_id,
                        side_effects = outcome.as_str(),
                        "forwarded message"
                    );
                }
            }
        }
        Ok(())
    }

    async fn relay_to_mapping(
        &self,
        session: &dyn Session,
        event: &ChatEvent,
        mapping: &ChannelMapping,
    ) -> Result<RelayOutcome, RelayError> {
        let media_kind = classify_media(event);
        if !passes_filters(&event.text, media_kind, &mapping.filters) {
            return Ok(RelayOutcome::Skipped);
        }
        if !passes_schedule(event.timestamp, mapping.schedule.as_ref()) {
            return Ok(RelayOutcome::Skipped);
        }

        let source_title = event
            .chat_title
            .clone()
            .or_else(|| mapping.source_chat_title.clone())
            .unwrap_or_default();

        let mut context = TransformContext::new();
        context.set("original_text", event.text.clone());
        context.set("source_chat_id", event.chat_id.to_string());
        context.set("dest_chat_id", mapping.dest_chat_id.to_string());
        context.set("source_chat_title", source_title.clone());
        context.set(
            "dest_chat_title",
            mapping.dest_chat_title.clone().unwrap_or_default(),
        );
        context.set("message_id", event.message_id.to_string());
        context.set("media_type", media_kind.as_str());
        context.set("date_utc", event.timestamp.to_rfc3339());

        let transformed = apply_transforms(&event.text, &mapping.transforms, &context, media_kind);
        let replacement = pick_media_replacement(event, &mapping.transforms);

        let reply_to = match event.reply_to_msg_id {
            Some(reply_id) => {
                self.reply_index
                    .lookup(self.user_id, event.chat_id, reply_id, mapping.dest_chat_id)
                    .await?
            }
            None => None,
        };

        let Some(sent) = self
            .deliver(
                session,
                mapping,
                event,
                &transformed,
                replacement.as_deref(),
                reply_to,
            )
            .await?
        else {
            return Ok(RelayOutcome::Skipped);
        };

        self.reply_index
            .save(&ReplyIndexEntry {
                user_id: self.user_id,
                source_chat_id: event.chat_id,
                source_msg_id: event.message_id,
                dest_chat_id: mapping.dest_chat_id,
                dest_msg_id: sent.message_id,
            })
            .await?;

        Ok(self
            .record_audit(session, event, mapping, &sent, source_title)
            .await)
    }

    /// Try the configured destination id, then its alternate encoding. Only
    /// an invalid-destination error moves to the next candidate; any other
    /// failure is fatal for the worker.
    async fn deliver(
        &self,
        session: &dyn Session,
        mapping: &ChannelMapping,
        event: &ChatEvent,
        text: &str,
        replacement: Option<&Path>,
        reply_to: Option<i64>,
    ) -> Result<Option<SentMessage>, RelayError> {
        let dest_ids = candidate_ids(mapping.dest_chat_id);
        for &dest_id in &dest_ids {
            match self
                .send_to_destination(session, dest_id, event, text, replacement, reply_to, mapping.id)
                .await
            {
                Ok(sent) => return Ok(Some(sent)),
                Err(TransportError::InvalidDestination(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        warn!(
            mapping_id = mapping.id,
            "failed to send to dest_chat_id={} (tried {:?}): destination id invalid",
            mapping.dest_chat_id,
            dest_ids
        );
        Ok(None)
    }

    async fn send_to_destination(
        &self,
        session: &dyn Session,
        dest_id: i64,
        event: &ChatEvent,
        text: &str,
        replacement: Option<&Path>,
        reply_to: Option<i64>,
        mapping_id: i64,
    ) -> Result<SentMessage, TransportError> {
        let original_media = event
            .media
            .as_ref()
            .filter(|media| media.is_supported() && media.is_displayable());

        let payload = match (replacement, original_media) {
            (Some(path), _) => Some(OutgoingMedia::LocalFile(path.to_path_buf())),
            (None, Some(media)) => Some(OutgoingMedia::Existing {
                kind: media.kind,
                file_id: media.file_id.clone(),
            }),
            (None, None) => None,
        };

        if let Some(payload) = payload {
            match session.send_media(dest_id, &payload, text, reply_to).await {
                Ok(sent) => return Ok(sent),
                Err(TransportError::MissingAsset(path)) => {
                    if let (Some(_), Some(media)) = (replacement, original_media) {
                        // The configured replacement is unreadable; degrade
                        // to the original incoming media instead of dropping
                        // the message.
                        warn!(
                            mapping_id,
                            path = %path.display(),
                            "replacement media missing/unreadable, sending original media"
                        );
                        let original = OutgoingMedia::Existing {
                            kind: media.kind,
                            file_id: media.file_id.clone(),
                        };
                        match session.send_media(dest_id, &original, text, reply_to).await {
                            Ok(sent) => return Ok(sent),
                            Err(
                                TransportError::MissingAsset(_)
                                | TransportError::PayloadRejected(_),
                            ) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    // No incoming media to fall back to: drop the media and
                    // send text only.
                }
                Err(TransportError::PayloadRejected(reason)) => {
                    warn!(mapping_id, "media payload rejected, sending text only: {reason}");
                }
                Err(e) => return Err(e),
            }
        }

        session.send_text(dest_id, text, reply_to).await
    }

    /// Best-effort side effects after a successful send: resolve
    /// human-readable titles and write the audit document. Failures here are
    /// logged and reported as a degraded outcome, never raised.
    async fn record_audit(
        &self,
        session: &dyn Session,
        event: &ChatEvent,
        mapping: &ChannelMapping,
        sent: &SentMessage,
        source_title: String,
    ) -> RelayOutcome {
        let mut degraded = false;

        let mut dest_title = mapping.dest_chat_title.clone().unwrap_or_default();
        if dest_title.is_empty() {
            for dest_id in [
                Some(mapping.dest_chat_id),
                alternate_chat_id(mapping.dest_chat_id),
            ]
            .into_iter()
            .flatten()
            {
                match session.chat_title(dest_id).await {
                    Ok(Some(title)) if !title.is_empty() => {
                        dest_title = title;
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => degraded = true,
                }
            }
        }

        let entry = MessageLogEntry {
            user_id: self.user_id,
            source_chat_id: event.chat_id,
            source_msg_id: event.message_id,
            dest_chat_id: mapping.dest_chat_id,
            dest_msg_id: sent.message_id,
            source_chat_title: source_title,
            dest_chat_title: dest_title,
            timestamp: event.timestamp,
            status: "ok".to_string(),
        };
        if let Err(e) = self.audit_log.insert(&entry).await {
            warn!("failed to write message log (non-fatal): {e}");
            degraded = true;
        }

        if degraded {
            RelayOutcome::Degraded
        } else {
            RelayOutcome::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::db::{MappingFilter, TransformAction, TransformRule};
    use crate::telegram::{IncomingMedia, IncomingMediaKind};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct SentText {
        dest: i64,
        text: String,
        reply_to: Option<i64>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct SentMedia {
        dest: i64,
        media: OutgoingMedia,
        caption: String,
        reply_to: Option<i64>,
    }

    #[derive(Default)]
    struct FakeSession {
        texts: AsyncMutex<Vec<SentText>>,
        media: AsyncMutex<Vec<SentMedia>>,
        next_id: AtomicI64,
        invalid_destinations: HashSet<i64>,
        reject_media_payloads: bool,
        fail_sends: bool,
        titles: std::collections::HashMap<i64, String>,
    }

    impl FakeSession {
        fn new() -> Self {
            Self {
                next_id: AtomicI64::new(1000),
                ..Self::default()
            }
        }

        fn allocate_id(&self) -> i64 {
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn check_destination(&self, dest: i64) -> Result<(), TransportError> {
            if self.fail_sends {
                return Err(TransportError::Api {
                    code: 420,
                    description: "flood control exceeded".to_string(),
                });
            }
            if self.invalid_destinations.contains(&dest) {
                return Err(TransportError::InvalidDestination(dest));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn send_text(
            &self,
            dest_chat_id: i64,
            text: &str,
            reply_to: Option<i64>,
        ) -> Result<SentMessage, TransportError> {
            self.check_destination(dest_chat_id)?;
            self.texts.lock().await.push(SentText {
                dest: dest_chat_id,
                text: text.to_string(),
                reply_to,
            });
            Ok(SentMessage {
                message_id: self.allocate_id(),
            })
        }

        async fn send_media(
            &self,
            dest_chat_id: i64,
            media: &OutgoingMedia,
            caption: &str,
            reply_to: Option<i64>,
        ) -> Result<SentMessage, TransportError> {
            self.check_destination(dest_chat_id)?;
            if let OutgoingMedia::LocalFile(path) = media
                && !path.exists()
            {
                return Err(TransportError::MissingAsset(path.clone()));
            }
            if self.reject_media_payloads {
                return Err(TransportError::PayloadRejected(
                    "file payload not acceptable".to_string(),
                ));
            }
            self.media.lock().await.push(SentMedia {
                dest: dest_chat_id,
                media: media.clone(),
                caption: caption.to_string(),
                reply_to,
            });
            Ok(SentMessage {
                message_id: self.allocate_id(),
            })
        }

        async fn chat_title(&self, chat_id: i64) -> Result<Option<String>, TransportError> {
            Ok(self.titles.get(&chat_id).cloned())
        }

        async fn next_event(&self) -> Result<Option<ChatEvent>, TransportError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct MemoryReplyIndex {
        entries: AsyncMutex<std::collections::HashMap<(i64, i64, i64, i64), i64>>,
    }

    #[async_trait]
    impl ReplyIndexStore for MemoryReplyIndex {
        async fn lookup(
            &self,
            user_id: i64,
            source_chat_id: i64,
            source_msg_id: i64,
            dest_chat_id: i64,
        ) -> Result<Option<i64>, DatabaseError> {
            Ok(self
                .entries
                .lock()
                .await
                .get(&(user_id, source_chat_id, source_msg_id, dest_chat_id))
                .copied())
        }

        async fn save(&self, entry: &ReplyIndexEntry) -> Result<(), DatabaseError> {
            self.entries.lock().await.insert(
                (
                    entry.user_id,
                    entry.source_chat_id,
                    entry.source_msg_id,
                    entry.dest_chat_id,
                ),
                entry.dest_msg_id,
            );
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryAuditLog {
        entries: AsyncMutex<Vec<MessageLogEntry>>,
        fail: bool,
    }

    #[async_trait]
    impl AuditLogSink for MemoryAuditLog {
        async fn insert(&self, entry: &MessageLogEntry) -> Result<(), DatabaseError> {
            if self.fail {
                return Err(DatabaseError::Query("sink unavailable".to_string()));
            }
            self.entries.lock().await.push(entry.clone());
            Ok(())
        }
    }

    const SOURCE: i64 = -1_001_000_000_010;
    const DEST: i64 = -1_001_000_000_020;

    fn mapping(id: i64) -> ChannelMapping {
        ChannelMapping {
            id,
            user_id: 1,
            telegram_account_id: None,
            source_chat_id: SOURCE,
            dest_chat_id: DEST,
            source_chat_title: Some("Source Channel".to_string()),
            dest_chat_title: Some("Dest Channel".to_string()),
            enabled: true,
            filters: Vec::new(),
            transforms: Vec::new(),
            schedule: None,
        }
    }

    fn include_filter(text: &str) -> MappingFilter {
        MappingFilter {
            include_text: Some(text.to_string()),
            ..MappingFilter::default()
        }
    }

    fn text_event(msg_id: i64, text: &str) -> ChatEvent {
        ChatEvent {
            chat_id: SOURCE,
            message_id: msg_id,
            text: text.to_string(),
            media: None,
            reply_to_msg_id: None,
            timestamp: Utc::now(),
            chat_title: Some("Source Channel".to_string()),
        }
    }

    fn photo_event(msg_id: i64, text: &str) -> ChatEvent {
        ChatEvent {
            media: Some(IncomingMedia {
                kind: IncomingMediaKind::Photo,
                file_id: "photo-file".to_string(),
            }),
            ..text_event(msg_id, text)
        }
    }

    struct Harness {
        handler: RelayHandler,
        reply_index: Arc<MemoryReplyIndex>,
        audit: Arc<MemoryAuditLog>,
    }

    fn harness(mappings: Vec<ChannelMapping>) -> Harness {
        let reply_index = Arc::new(MemoryReplyIndex::default());
        let audit = Arc::new(MemoryAuditLog::default());
        let handler = RelayHandler::new(1, mappings, reply_index.clone(), audit.clone());
        Harness {
            handler,
            reply_index,
            audit,
        }
    }

    #[tokio::test]
    async fn matching_filter_forwards_and_writes_audit_log() {
        let mut m = mapping(1);
        m.filters = vec![include_filter("hello")];
        let h = harness(vec![m]);
        let session = FakeSession::new();

        h.handler
            .handle_event(&session, &text_event(56, "hello world"))
            .await
            .expect("relay");

        let texts = session.texts.lock().await;
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].dest, DEST);
        assert_eq!(texts[0].text, "hello world");

        let logs = h.audit.entries.lock().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, "ok");
        assert_eq!(logs[0].source_msg_id, 56);
        assert_eq!(logs[0].source_chat_title, "Source Channel");
        assert_eq!(logs[0].dest_chat_title, "Dest Channel");
    }

    #[tokio::test]
    async fn failing_filter_sends_nothing_and_logs_nothing() {
        let mut m = mapping(1);
        m.filters = vec![include_filter("required")];
        let h = harness(vec![m]);
        let session = FakeSession::new();

        h.handler
            .handle_event(&session, &text_event(57, "other text"))
            .await
            .expect("relay");

        assert!(session.texts.lock().await.is_empty());
        assert!(session.media.lock().await.is_empty());
        assert!(h.audit.entries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn replies_are_threaded_through_the_index() {
        let h = harness(vec![mapping(1)]);
        let session = FakeSession::new();

        h.reply_index
            .save(&ReplyIndexEntry {
                user_id: 1,
                source_chat_id: SOURCE,
                source_msg_id: 55,
                dest_chat_id: DEST,
                dest_msg_id: 77,
            })
            .await
            .expect("seed");

        let mut event = text_event(56, "a reply");
        event.reply_to_msg_id = Some(55);
        h.handler.handle_event(&session, &event).await.expect("relay");

        let texts = session.texts.lock().await;
        assert_eq!(texts[0].reply_to, Some(77));
    }

    #[tokio::test]
    async fn unindexed_reply_sends_without_reply_linkage() {
        let h = harness(vec![mapping(1)]);
        let session = FakeSession::new();

        let mut event = text_event(56, "a reply");
        event.reply_to_msg_id = Some(999);
        h.handler.handle_event(&session, &event).await.expect("relay");

        assert_eq!(session.texts.lock().await[0].reply_to, None);
    }

    #[tokio::test]
    async fn successful_send_indexes_the_destination_message() {
        let h = harness(vec![mapping(1)]);
        let session = FakeSession::new();

        h.handler
            .handle_event(&session, &text_event(60, "index me"))
            .await
            .expect("relay");

        let dest_msg = h
            .reply_index
            .lookup(1, SOURCE, 60, DEST)
            .await
            .expect("lookup");
        assert!(dest_msg.is_some());
    }

    #[tokio::test]
    async fn transform_chain_applies_in_priority_order() {
        let mut m = mapping(1);
        m.transforms = vec![
            TransformRule {
                id: 1,
                priority: 10,
                enabled: true,
                apply_to_media_types: None,
                action: TransformAction::Regex {
                    pattern: r"#\d+".to_string(),
                    flags: None,
                    replace: "#XXX".to_string(),
                },
            },
            TransformRule {
                id: 2,
                priority: 20,
                enabled: true,
                apply_to_media_types: None,
                action: TransformAction::Text {
                    find: Some("Sam channel".to_string()),
                    replace: "Tom channel".to_string(),
                },
            },
            TransformRule {
                id: 3,
                priority: 30,
                enabled: true,
                apply_to_media_types: None,
                action: TransformAction::Emoji {
                    find: Some("🔥".to_string()),
                    replace: "⭐".to_string(),
                },
            },
        ];
        let h = harness(vec![m]);
        let session = FakeSession::new();

        h.handler
            .handle_event(
                &session,
                &text_event(61, "Welcome to Sam channel order #123 🔥"),
            )
            .await
            .expect("relay");

        assert_eq!(
            session.texts.lock().await[0].text,
            "Welcome to Tom channel order #XXX ⭐"
        );
    }

    #[tokio::test]
    async fn missing_replacement_asset_falls_back_to_original_media() {
        let mut m = mapping(1);
        m.transforms = vec![TransformRule {
            id: 1,
            priority: 10,
            enabled: true,
            apply_to_media_types: Some("photo".to_string()),
            action: TransformAction::Media {
                asset_path: "/definitely/not/here.png".to_string(),
            },
        }];
        let h = harness(vec![m]);
        let session = FakeSession::new();

        h.handler
            .handle_event(&session, &photo_event(62, "look"))
            .await
            .expect("relay");

        let media = session.media.lock().await;
        assert_eq!(media.len(), 1);
        assert_eq!(
            media[0].media,
            OutgoingMedia::Existing {
                kind: IncomingMediaKind::Photo,
                file_id: "photo-file".to_string()
            }
        );
        assert!(session.texts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_media_payload_degrades_to_text() {
        let h = harness(vec![mapping(1)]);
        let mut session = FakeSession::new();
        session.reject_media_payloads = true;

        h.handler
            .handle_event(&session, &photo_event(63, "caption text"))
            .await
            .expect("relay");

        assert!(session.media.lock().await.is_empty());
        let texts = session.texts.lock().await;
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].text, "caption text");
    }

    #[tokio::test]
    async fn invalid_destination_retries_the_alternate_encoding() {
        let h = harness(vec![mapping(1)]);
        let mut session = FakeSession::new();
        session.invalid_destinations.insert(DEST);

        h.handler
            .handle_event(&session, &text_event(64, "fallback"))
            .await
            .expect("relay");

        let texts = session.texts.lock().await;
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].dest, alternate_chat_id(DEST).unwrap());
    }

    #[tokio::test]
    async fn exhausted_destinations_skip_the_mapping_without_crashing() {
        let h = harness(vec![mapping(1)]);
        let mut session = FakeSession::new();
        session.invalid_destinations.insert(DEST);
        session
            .invalid_destinations
            .insert(alternate_chat_id(DEST).unwrap());

        h.handler
            .handle_event(&session, &text_event(65, "nowhere to go"))
            .await
            .expect("relay");

        assert!(session.texts.lock().await.is_empty());
        assert!(h.audit.entries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unexpected_send_errors_propagate() {
        let h = harness(vec![mapping(1)]);
        let mut session = FakeSession::new();
        session.fail_sends = true;

        let err = h
            .handler
            .handle_event(&session, &text_event(66, "boom"))
            .await
            .expect_err("fatal error propagates");
        assert!(matches!(
            err,
            RelayError::Transport(TransportError::Api { .. })
        ));
    }

    #[tokio::test]
    async fn event_reported_under_alternate_encoding_still_matches() {
        let h = harness(vec![mapping(1)]);
        let session = FakeSession::new();

        let mut event = text_event(67, "alt encoding");
        event.chat_id = alternate_chat_id(SOURCE).unwrap();
        h.handler.handle_event(&session, &event).await.expect("relay");

        assert_eq!(session.texts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn one_event_fans_out_but_never_doubles_one_mapping() {
        let mut other = mapping(2);
        other.dest_chat_id = -1_001_000_000_030;
        let h = harness(vec![mapping(1), other]);
        let session = FakeSession::new();

        h.handler
            .handle_event(&session, &text_event(68, "fan out"))
            .await
            .expect("relay");

        let texts = session.texts.lock().await;
        assert_eq!(texts.len(), 2);
        let dests: Vec<i64> = texts.iter().map(|t| t.dest).collect();
        assert!(dests.contains(&DEST));
        assert!(dests.contains(&-1_001_000_000_030));
    }

    #[tokio::test]
    async fn unknown_chats_are_ignored() {
        let h = harness(vec![mapping(1)]);
        let session = FakeSession::new();

        let mut event = text_event(69, "stranger");
        event.chat_id = -1_001_999_999_999;
        h.handler.handle_event(&session, &event).await.expect("relay");
        // Second event from the same unknown chat exercises the dedup path.
        h.handler.handle_event(&session, &event).await.expect("relay");

        assert!(session.texts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn audit_failure_degrades_but_still_delivers() {
        let reply_index = Arc::new(MemoryReplyIndex::default());
        let audit = Arc::new(MemoryAuditLog {
            fail: true,
            ..MemoryAuditLog::default()
        });
        let handler = RelayHandler::new(1, vec![mapping(1)], reply_index.clone(), audit);
        let session = FakeSession::new();

        handler
            .handle_event(&session, &text_event(70, "still delivered"))
            .await
            .expect("audit failure is non-fatal");

        assert_eq!(session.texts.lock().await.len(), 1);
        assert!(
            reply_index
                .lookup(1, SOURCE, 70, DEST)
                .await
                .expect("lookup")
                .is_some()
        );
    }

    #[tokio::test]
    async fn dest_title_is_resolved_live_when_not_configured() {
        let mut m = mapping(1);
        m.dest_chat_title = None;
        let h = harness(vec![m]);
        let mut session = FakeSession::new();
        session.titles.insert(DEST, "Resolved Dest".to_string());

        h.handler
            .handle_event(&session, &text_event(71, "titles"))
            .await
            .expect("relay");

        assert_eq!(h.audit.entries.lock().await[0].dest_chat_title, "Resolved Dest");
    }

    #[tokio::test]
    async fn scheduled_mapping_outside_window_is_skipped() {
        use crate::db::{DayWindow, Schedule};

        let mut schedule = Schedule::default();
        // Whatever weekday "now" is, a 00:00–00:00 window only passes at
        // exactly midnight.
        for day in schedule.days.iter_mut() {
            *day = DayWindow {
                start: Some("00:00".to_string()),
                end: Some("00:00".to_string()),
            };
        }
        let mut m = mapping(1);
        m.schedule = Some(schedule);
        let h = harness(vec![m]);
        let session = FakeSession::new();

        let mut event = text_event(72, "late");
        event.timestamp = Utc::now()
            .date_naive()
            .and_hms_opt(12, 30, 0)
            .unwrap()
            .and_utc();
        h.handler.handle_event(&session, &event).await.expect("relay");

        assert!(session.texts.lock().await.is_empty());
    }
}
