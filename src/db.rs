pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{
    ChannelMapping, DayWindow, MappingFilter, MessageLogEntry, ReplyIndexEntry, Schedule,
    TelegramAccount, TransformAction, TransformRule, WorkerRegistration,
};
pub use self::stores::{
    AccountStore, AuditLogSink, MappingStore, ReplyIndexStore, WorkerRegistryStore,
};

pub mod error;
pub mod manager;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod stores;
