use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured source-chat → destination-chat forwarding rule, loaded as
/// an immutable snapshot at worker startup together with its filters,
/// transforms and resolved schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub id: i64,
    pub user_id: i64,
    pub telegram_account_id: Option<i64>,
    pub source_chat_id: i64,
    pub dest_chat_id: i64,
    pub source_chat_title: Option<String>,
    pub dest_chat_title: Option<String>,
    pub enabled: bool,
    pub filters: Vec<MappingFilter>,
    pub transforms: Vec<TransformRule>,
    pub schedule: Option<Schedule>,
}

/// Independent predicate record. A message must satisfy every filter on a
/// mapping; within one filter the set fields are ANDed as well.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingFilter {
    pub include_text: Option<String>,
    pub exclude_text: Option<String>,
    /// Comma-separated media type names ("text,photo"). Empty means any.
    pub media_types: Option<String>,
    pub regex_pattern: Option<String>,
}

/// An ordered rewrite rule. Lower priority runs first, ties broken by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRule {
    pub id: i64,
    pub priority: i64,
    pub enabled: bool,
    /// Comma-separated media type scope; empty/absent applies to all types,
    /// and `any`/`all`/`*` entries match everything.
    pub apply_to_media_types: Option<String>,
    pub action: TransformAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformAction {
    Text {
        find: Option<String>,
        replace: String,
    },
    Emoji {
        find: Option<String>,
        replace: String,
    },
    Regex {
        pattern: String,
        /// Letter set drawn from {i, m, s}.
        flags: Option<String>,
        replace: String,
    },
    Template {
        template: String,
    },
    Media {
        asset_path: String,
    },
}

/// UTC forwarding window for one weekday. Both bounds absent means the day
/// is unrestricted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayWindow {
    /// "HH:MM" UTC, inclusive.
    pub start: Option<String>,
    /// "HH:MM" UTC, inclusive.
    pub end: Option<String>,
}

/// Per-weekday UTC windows, Monday first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    pub days: [DayWindow; 7],
}

impl Schedule {
    pub fn is_empty(&self) -> bool {
        self.days
            .iter()
            .all(|day| day.start.is_none() && day.end.is_none())
    }

    /// Window for a weekday index, Monday = 0 .. Sunday = 6.
    pub fn window(&self, weekday: usize) -> &DayWindow {
        &self.days[weekday]
    }
}

/// One row of the reply index: where a forwarded source message landed, so
/// replies to it can be threaded in the destination chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyIndexEntry {
    pub user_id: i64,
    pub source_chat_id: i64,
    pub source_msg_id: i64,
    pub dest_chat_id: i64,
    pub dest_msg_id: i64,
}

/// Durable record of a spawned worker process, used to reattach or respawn
/// after a control-plane restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub user_id: i64,
    pub account_id: i64,
    pub session_path: String,
    pub pid: i32,
    pub created_at: DateTime<Utc>,
}

/// Audit document written after each successful delivery. Best-effort: a
/// failed insert is logged and never fails the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub user_id: i64,
    pub source_chat_id: i64,
    pub source_msg_id: i64,
    pub dest_chat_id: i64,
    pub dest_msg_id: i64,
    pub source_chat_title: String,
    pub dest_chat_title: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramAccount {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub session_path: Option<String>,
    pub status: String,
}

impl TelegramAccount {
    pub fn has_usable_session(&self) -> bool {
        self.session_path
            .as_deref()
            .is_some_and(|path| !path.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_with_no_windows_is_empty() {
        assert!(Schedule::default().is_empty());
    }

    #[test]
    fn schedule_with_one_bound_is_not_empty() {
        let mut schedule = Schedule::default();
        schedule.days[3].start = Some("09:00".to_string());
        assert!(!schedule.is_empty());
    }

    #[test]
    fn account_without_session_path_is_unusable() {
        let account = TelegramAccount {
            id: 1,
            user_id: 1,
            kind: "user".to_string(),
            session_path: None,
            status: "active".to_string(),
        };
        assert!(!account.has_usable_session());

        let account = TelegramAccount {
            session_path: Some(String::new()),
            ..account
        };
        assert!(!account.has_usable_session());

        let account = TelegramAccount {
            session_path: Some("data/sessions/a.session".to_string()),
            ..account
        };
        assert!(account.has_usable_session());
    }
}
