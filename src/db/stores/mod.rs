use async_trait::async_trait;

use super::DatabaseError;
use super::models::{
    ChannelMapping, MessageLogEntry, ReplyIndexEntry, TelegramAccount, WorkerRegistration,
};

/// Read-only view of the mapping configuration owned by the external CRUD
/// API. Workers load one snapshot at startup; edits take effect on restart.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Enabled mappings for a user with filters, transforms (ordered by
    /// priority then id) and resolved schedule. With an account id, only
    /// mappings scoped to that account or to no account are returned.
    async fn list_enabled_mappings(
        &self,
        user_id: i64,
        account_id: Option<i64>,
    ) -> Result<Vec<ChannelMapping>, DatabaseError>;
}

#[async_trait]
pub trait ReplyIndexStore: Send + Sync {
    async fn lookup(
        &self,
        user_id: i64,
        source_chat_id: i64,
        source_msg_id: i64,
        dest_chat_id: i64,
    ) -> Result<Option<i64>, DatabaseError>;

    /// Upsert keyed by (user, source chat, source msg, dest chat);
    /// last write wins so an idempotent resend simply overwrites.
    async fn save(&self, entry: &ReplyIndexEntry) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait AuditLogSink: Send + Sync {
    async fn insert(&self, entry: &MessageLogEntry) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait WorkerRegistryStore: Send + Sync {
    async fn list(&self) -> Result<Vec<WorkerRegistration>, DatabaseError>;
    async fn list_for_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<WorkerRegistration>, DatabaseError>;
    async fn insert(&self, registration: &WorkerRegistration) -> Result<(), DatabaseError>;
    async fn remove(&self, worker_id: &str) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_active(&self, account_id: i64) -> Result<Option<TelegramAccount>, DatabaseError>;
    async fn list_active_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<TelegramAccount>, DatabaseError>;
}
