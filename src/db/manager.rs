use std::sync::Arc;

use diesel::RunQueryDsl;
use diesel::sqlite::SqliteConnection;
use diesel::Connection;

use crate::db::sqlite::{
    SqliteAccountStore, SqliteAuditLog, SqliteMappingStore, SqliteReplyIndexStore,
    SqliteWorkerRegistry,
};
use crate::db::{
    AccountStore, AuditLogSink, DatabaseError, MappingStore, ReplyIndexStore, WorkerRegistryStore,
};

#[derive(Clone)]
pub struct DatabaseManager {
    sqlite_path: String,
    mapping_store: Arc<dyn MappingStore>,
    reply_index: Arc<dyn ReplyIndexStore>,
    audit_log: Arc<dyn AuditLogSink>,
    worker_registry: Arc<dyn WorkerRegistryStore>,
    account_store: Arc<dyn AccountStore>,
}

impl DatabaseManager {
    pub fn new(sqlite_path: &str) -> Self {
        let path_arc = Arc::new(sqlite_path.to_string());

        Self {
            sqlite_path: sqlite_path.to_string(),
            mapping_store: Arc::new(SqliteMappingStore::new(path_arc.clone())),
            reply_index: Arc::new(SqliteReplyIndexStore::new(path_arc.clone())),
            audit_log: Arc::new(SqliteAuditLog::new(path_arc.clone())),
            worker_registry: Arc::new(SqliteWorkerRegistry::new(path_arc.clone())),
            account_store: Arc::new(SqliteAccountStore::new(path_arc)),
        }
    }

    pub fn mappings(&self) -> Arc<dyn MappingStore> {
        self.mapping_store.clone()
    }

    pub fn reply_index(&self) -> Arc<dyn ReplyIndexStore> {
        self.reply_index.clone()
    }

    pub fn audit_log(&self) -> Arc<dyn AuditLogSink> {
        self.audit_log.clone()
    }

    pub fn worker_registry(&self) -> Arc<dyn WorkerRegistryStore> {
        self.worker_registry.clone()
    }

    pub fn accounts(&self) -> Arc<dyn AccountStore> {
        self.account_store.clone()
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let path = self.sqlite_path.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = std::path::Path::new(&path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS channel_mappings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    telegram_account_id INTEGER,
                    source_chat_id INTEGER NOT NULL,
                    dest_chat_id INTEGER NOT NULL,
                    source_chat_title TEXT,
                    dest_chat_title TEXT,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS mapping_filters (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    mapping_id INTEGER NOT NULL REFERENCES channel_mappings(id) ON DELETE CASCADE,
                    include_text TEXT,
                    exclude_text TEXT,
                    media_types TEXT,
                    regex_pattern TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS mapping_transforms (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    mapping_id INTEGER NOT NULL REFERENCES channel_mappings(id) ON DELETE CASCADE,
                    rule_type TEXT NOT NULL,
                    find_text TEXT,
                    replace_text TEXT,
                    regex_pattern TEXT,
                    regex_flags TEXT,
                    replacement_media_asset_path TEXT,
                    apply_to_media_types TEXT,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    priority INTEGER NOT NULL DEFAULT 100
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS schedules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    mapping_id INTEGER REFERENCES channel_mappings(id) ON DELETE CASCADE,
                    mon_start_utc TEXT, mon_end_utc TEXT,
                    tue_start_utc TEXT, tue_end_utc TEXT,
                    wed_start_utc TEXT, wed_end_utc TEXT,
                    thu_start_utc TEXT, thu_end_utc TEXT,
                    fri_start_utc TEXT, fri_end_utc TEXT,
                    sat_start_utc TEXT, sat_end_utc TEXT,
                    sun_start_utc TEXT, sun_end_utc TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS dest_message_index (
                    user_id INTEGER NOT NULL,
                    source_chat_id INTEGER NOT NULL,
                    source_msg_id INTEGER NOT NULL,
                    dest_chat_id INTEGER NOT NULL,
                    dest_msg_id INTEGER NOT NULL,
                    PRIMARY KEY (user_id, source_chat_id, source_msg_id, dest_chat_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS worker_registry (
                    worker_id TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    account_id INTEGER NOT NULL,
                    session_path TEXT NOT NULL,
                    pid INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS message_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    source_chat_id INTEGER NOT NULL,
                    source_msg_id INTEGER NOT NULL,
                    dest_chat_id INTEGER NOT NULL,
                    dest_msg_id INTEGER NOT NULL,
                    source_chat_title TEXT NOT NULL DEFAULT '',
                    dest_chat_title TEXT NOT NULL DEFAULT '',
                    timestamp TEXT NOT NULL,
                    status TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS telegram_accounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    kind TEXT NOT NULL DEFAULT 'user',
                    session_path TEXT,
                    status TEXT NOT NULL DEFAULT 'active'
                )
                "#,
                r#"
                CREATE INDEX IF NOT EXISTS idx_channel_mappings_user
                ON channel_mappings(user_id, enabled)
                "#,
                r#"
                CREATE INDEX IF NOT EXISTS idx_worker_registry_account
                ON worker_registry(account_id)
                "#,
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("database task failed: {e}")))?
    }
}
