use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tracing::warn;

use super::DatabaseError;
use super::models::{
    ChannelMapping, DayWindow, MappingFilter, MessageLogEntry, ReplyIndexEntry, Schedule,
    TelegramAccount, TransformAction, TransformRule, WorkerRegistration,
};
use crate::db::schema::{
    channel_mappings, dest_message_index, mapping_filters, mapping_transforms, message_logs,
    schedules, telegram_accounts, worker_registry,
};

fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Rows written by this crate carry RFC 3339; rows created by the external
// CRUD API default to SQLite's "YYYY-MM-DD HH:MM:SS" (UTC).
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = channel_mappings)]
struct DbChannelMapping {
    id: i64,
    user_id: i64,
    telegram_account_id: Option<i64>,
    source_chat_id: i64,
    dest_chat_id: i64,
    source_chat_title: Option<String>,
    dest_chat_title: Option<String>,
    enabled: bool,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = mapping_filters)]
struct DbMappingFilter {
    include_text: Option<String>,
    exclude_text: Option<String>,
    media_types: Option<String>,
    regex_pattern: Option<String>,
}

impl DbMappingFilter {
    fn into_filter(self) -> MappingFilter {
        MappingFilter {
            include_text: self.include_text,
            exclude_text: self.exclude_text,
            media_types: self.media_types,
            regex_pattern: self.regex_pattern,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = mapping_transforms)]
struct DbMappingTransform {
    id: i64,
    mapping_id: i64,
    rule_type: String,
    find_text: Option<String>,
    replace_text: Option<String>,
    regex_pattern: Option<String>,
    regex_flags: Option<String>,
    replacement_media_asset_path: Option<String>,
    apply_to_media_types: Option<String>,
    enabled: bool,
    priority: i64,
}

impl DbMappingTransform {
    /// Rows that do not form a usable rule (unknown kind, regex without a
    /// pattern, media without an asset) are dropped at load time with a
    /// warning so the hot path never re-validates them.
    fn into_rule(self) -> Option<TransformRule> {
        let replace = self.replace_text.clone().unwrap_or_default();
        let action = match self.rule_type.as_str() {
            "text" => TransformAction::Text {
                find: self.find_text,
                replace,
            },
            "emoji" => TransformAction::Emoji {
                find: self.find_text,
                replace,
            },
            "regex" => match self.regex_pattern {
                Some(pattern) if !pattern.is_empty() => TransformAction::Regex {
                    pattern,
                    flags: self.regex_flags,
                    replace,
                },
                _ => {
                    warn!(
                        rule_id = self.id,
                        mapping_id = self.mapping_id,
                        "regex transform without a pattern skipped"
                    );
                    return None;
                }
            },
            "template" => TransformAction::Template { template: replace },
            "media" => match self.replacement_media_asset_path {
                Some(asset_path) if !asset_path.is_empty() => {
                    TransformAction::Media { asset_path }
                }
                _ => {
                    warn!(
                        rule_id = self.id,
                        mapping_id = self.mapping_id,
                        "media transform without an asset path skipped"
                    );
                    return None;
                }
            },
            other => {
                warn!(
                    rule_id = self.id,
                    mapping_id = self.mapping_id,
                    rule_type = other,
                    "unknown transform kind skipped"
                );
                return None;
            }
        };
        Some(TransformRule {
            id: self.id,
            priority: self.priority,
            enabled: self.enabled,
            apply_to_media_types: self.apply_to_media_types,
            action,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schedules)]
struct DbSchedule {
    mon_start_utc: Option<String>,
    mon_end_utc: Option<String>,
    tue_start_utc: Option<String>,
    tue_end_utc: Option<String>,
    wed_start_utc: Option<String>,
    wed_end_utc: Option<String>,
    thu_start_utc: Option<String>,
    thu_end_utc: Option<String>,
    fri_start_utc: Option<String>,
    fri_end_utc: Option<String>,
    sat_start_utc: Option<String>,
    sat_end_utc: Option<String>,
    sun_start_utc: Option<String>,
    sun_end_utc: Option<String>,
}

impl DbSchedule {
    fn into_schedule(self) -> Schedule {
        let day = |start: Option<String>, end: Option<String>| DayWindow { start, end };
        Schedule {
            days: [
                day(self.mon_start_utc, self.mon_end_utc),
                day(self.tue_start_utc, self.tue_end_utc),
                day(self.wed_start_utc, self.wed_end_utc),
                day(self.thu_start_utc, self.thu_end_utc),
                day(self.fri_start_utc, self.fri_end_utc),
                day(self.sat_start_utc, self.sat_end_utc),
                day(self.sun_start_utc, self.sun_end_utc),
            ],
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = worker_registry)]
struct DbWorkerRegistration {
    worker_id: String,
    user_id: i64,
    account_id: i64,
    session_path: String,
    pid: i32,
    created_at: String,
}

impl DbWorkerRegistration {
    fn to_registration(&self) -> Result<WorkerRegistration, DatabaseError> {
        Ok(WorkerRegistration {
            worker_id: self.worker_id.clone(),
            user_id: self.user_id,
            account_id: self.account_id,
            session_path: self.session_path.clone(),
            pid: self.pid,
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = worker_registry)]
struct NewWorkerRegistration<'a> {
    worker_id: &'a str,
    user_id: i64,
    account_id: i64,
    session_path: &'a str,
    pid: i32,
    created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = dest_message_index)]
struct NewReplyIndexEntry {
    user_id: i64,
    source_chat_id: i64,
    source_msg_id: i64,
    dest_chat_id: i64,
    dest_msg_id: i64,
}

#[derive(Insertable)]
#[diesel(table_name = message_logs)]
struct NewMessageLog<'a> {
    user_id: i64,
    source_chat_id: i64,
    source_msg_id: i64,
    dest_chat_id: i64,
    dest_msg_id: i64,
    source_chat_title: &'a str,
    dest_chat_title: &'a str,
    timestamp: String,
    status: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = telegram_accounts)]
struct DbTelegramAccount {
    id: i64,
    user_id: i64,
    kind: String,
    session_path: Option<String>,
    status: String,
}

impl DbTelegramAccount {
    fn into_account(self) -> TelegramAccount {
        TelegramAccount {
            id: self.id,
            user_id: self.user_id,
            kind: self.kind,
            session_path: self.session_path,
            status: self.status,
        }
    }
}

pub struct SqliteMappingStore {
    db_path: Arc<String>,
}

impl SqliteMappingStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::MappingStore for SqliteMappingStore {
    async fn list_enabled_mappings(
        &self,
        user_id: i64,
        account_id: Option<i64>,
    ) -> Result<Vec<ChannelMapping>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;

            let mut query = channel_mappings::table
                .filter(channel_mappings::user_id.eq(user_id))
                .filter(channel_mappings::enabled.eq(true))
                .select(DbChannelMapping::as_select())
                .order(channel_mappings::id.asc())
                .into_boxed();
            if let Some(account_id) = account_id {
                query = query.filter(
                    channel_mappings::telegram_account_id
                        .is_null()
                        .or(channel_mappings::telegram_account_id.eq(account_id)),
                );
            }
            let rows = query
                .load::<DbChannelMapping>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            rows.into_iter()
                .map(|row| load_mapping_details(&mut conn, row))
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

fn load_mapping_details(
    conn: &mut SqliteConnection,
    row: DbChannelMapping,
) -> Result<ChannelMapping, DatabaseError> {
    let filters = mapping_filters::table
        .filter(mapping_filters::mapping_id.eq(row.id))
        .order(mapping_filters::id.asc())
        .select(DbMappingFilter::as_select())
        .load::<DbMappingFilter>(conn)
        .map_err(|e| DatabaseError::Query(e.to_string()))?
        .into_iter()
        .map(DbMappingFilter::into_filter)
        .collect();

    let transforms = mapping_transforms::table
        .filter(mapping_transforms::mapping_id.eq(row.id))
        .order((
            mapping_transforms::priority.asc(),
            mapping_transforms::id.asc(),
        ))
        .select(DbMappingTransform::as_select())
        .load::<DbMappingTransform>(conn)
        .map_err(|e| DatabaseError::Query(e.to_string()))?
        .into_iter()
        .filter_map(DbMappingTransform::into_rule)
        .collect();

    let schedule = resolve_schedule(conn, row.user_id, row.id)?;

    Ok(ChannelMapping {
        id: row.id,
        user_id: row.user_id,
        telegram_account_id: row.telegram_account_id,
        source_chat_id: row.source_chat_id,
        dest_chat_id: row.dest_chat_id,
        source_chat_title: row.source_chat_title,
        dest_chat_title: row.dest_chat_title,
        enabled: row.enabled,
        filters,
        transforms,
        schedule,
    })
}

/// Mapping-level override (when any field is set) wins over the user-level
/// default; no row or an all-empty row means unrestricted.
fn resolve_schedule(
    conn: &mut SqliteConnection,
    user_id: i64,
    mapping_id: i64,
) -> Result<Option<Schedule>, DatabaseError> {
    let mapping_row = schedules::table
        .filter(schedules::mapping_id.eq(mapping_id))
        .select(DbSchedule::as_select())
        .first::<DbSchedule>(conn)
        .optional()
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    if let Some(row) = mapping_row {
        let schedule = row.into_schedule();
        if !schedule.is_empty() {
            return Ok(Some(schedule));
        }
    }

    let user_row = schedules::table
        .filter(schedules::user_id.eq(user_id))
        .filter(schedules::mapping_id.is_null())
        .select(DbSchedule::as_select())
        .first::<DbSchedule>(conn)
        .optional()
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    Ok(user_row
        .map(DbSchedule::into_schedule)
        .filter(|schedule| !schedule.is_empty()))
}

pub struct SqliteReplyIndexStore {
    db_path: Arc<String>,
}

impl SqliteReplyIndexStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::ReplyIndexStore for SqliteReplyIndexStore {
    async fn lookup(
        &self,
        user_id_param: i64,
        source_chat_id_param: i64,
        source_msg_id_param: i64,
        dest_chat_id_param: i64,
    ) -> Result<Option<i64>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::dest_message_index::dsl::*;
            dest_message_index
                .filter(user_id.eq(user_id_param))
                .filter(source_chat_id.eq(source_chat_id_param))
                .filter(source_msg_id.eq(source_msg_id_param))
                .filter(dest_chat_id.eq(dest_chat_id_param))
                .select(dest_msg_id)
                .first::<i64>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn save(&self, entry: &ReplyIndexEntry) -> Result<(), DatabaseError> {
        let entry = entry.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = NewReplyIndexEntry {
                user_id: entry.user_id,
                source_chat_id: entry.source_chat_id,
                source_msg_id: entry.source_msg_id,
                dest_chat_id: entry.dest_chat_id,
                dest_msg_id: entry.dest_msg_id,
            };
            diesel::replace_into(dest_message_index::table)
                .values(&row)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct SqliteAuditLog {
    db_path: Arc<String>,
}

impl SqliteAuditLog {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::AuditLogSink for SqliteAuditLog {
    async fn insert(&self, entry: &MessageLogEntry) -> Result<(), DatabaseError> {
        let entry = entry.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = NewMessageLog {
                user_id: entry.user_id,
                source_chat_id: entry.source_chat_id,
                source_msg_id: entry.source_msg_id,
                dest_chat_id: entry.dest_chat_id,
                dest_msg_id: entry.dest_msg_id,
                source_chat_title: &entry.source_chat_title,
                dest_chat_title: &entry.dest_chat_title,
                timestamp: datetime_to_string(&entry.timestamp),
                status: &entry.status,
            };
            diesel::insert_into(message_logs::table)
                .values(&row)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct SqliteWorkerRegistry {
    db_path: Arc<String>,
}

impl SqliteWorkerRegistry {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::WorkerRegistryStore for SqliteWorkerRegistry {
    async fn list(&self) -> Result<Vec<WorkerRegistration>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            worker_registry::table
                .select(DbWorkerRegistration::as_select())
                .load::<DbWorkerRegistration>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .iter()
                .map(DbWorkerRegistration::to_registration)
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_for_account(
        &self,
        account_id_param: i64,
    ) -> Result<Vec<WorkerRegistration>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::worker_registry::dsl::*;
            worker_registry
                .filter(account_id.eq(account_id_param))
                .select(DbWorkerRegistration::as_select())
                .load::<DbWorkerRegistration>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .iter()
                .map(DbWorkerRegistration::to_registration)
                .collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn insert(&self, registration: &WorkerRegistration) -> Result<(), DatabaseError> {
        let registration = registration.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let row = NewWorkerRegistration {
                worker_id: &registration.worker_id,
                user_id: registration.user_id,
                account_id: registration.account_id,
                session_path: &registration.session_path,
                pid: registration.pid,
                created_at: datetime_to_string(&registration.created_at),
            };
            diesel::insert_into(worker_registry::table)
                .values(&row)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn remove(&self, worker_id_param: &str) -> Result<(), DatabaseError> {
        let worker_id_param = worker_id_param.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            use crate::db::schema::worker_registry::dsl::*;
            diesel::delete(worker_registry.filter(worker_id.eq(worker_id_param)))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct SqliteAccountStore {
    db_path: Arc<String>,
}

impl SqliteAccountStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::AccountStore for SqliteAccountStore {
    async fn get_active(
        &self,
        account_id: i64,
    ) -> Result<Option<TelegramAccount>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            telegram_accounts::table
                .filter(telegram_accounts::id.eq(account_id))
                .filter(telegram_accounts::status.eq("active"))
                .select(DbTelegramAccount::as_select())
                .first::<DbTelegramAccount>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))
                .map(|row| row.map(DbTelegramAccount::into_account))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_active_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<TelegramAccount>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            Ok(telegram_accounts::table
                .filter(telegram_accounts::user_id.eq(user_id))
                .filter(telegram_accounts::status.eq("active"))
                .select(DbTelegramAccount::as_select())
                .load::<DbTelegramAccount>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .into_iter()
                .map(DbTelegramAccount::into_account)
                .collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixture helpers for store tests: raw inserts into the tables the
    //! external CRUD API normally owns.

    use diesel::prelude::*;

    use super::establish_connection;
    use crate::db::schema::{channel_mappings, mapping_filters, mapping_transforms, schedules};

    #[derive(Insertable)]
    #[diesel(table_name = channel_mappings)]
    pub struct MappingFixture {
        pub id: i64,
        pub user_id: i64,
        pub telegram_account_id: Option<i64>,
        pub source_chat_id: i64,
        pub dest_chat_id: i64,
        pub source_chat_title: Option<String>,
        pub dest_chat_title: Option<String>,
        pub enabled: bool,
        pub created_at: String,
    }

    #[derive(Insertable)]
    #[diesel(table_name = mapping_filters)]
    pub struct FilterFixture {
        pub id: i64,
        pub mapping_id: i64,
        pub include_text: Option<String>,
        pub exclude_text: Option<String>,
        pub media_types: Option<String>,
        pub regex_pattern: Option<String>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = mapping_transforms)]
    pub struct TransformFixture {
        pub id: i64,
        pub mapping_id: i64,
        pub rule_type: String,
        pub find_text: Option<String>,
        pub replace_text: Option<String>,
        pub regex_pattern: Option<String>,
        pub regex_flags: Option<String>,
        pub replacement_media_asset_path: Option<String>,
        pub apply_to_media_types: Option<String>,
        pub enabled: bool,
        pub priority: i64,
    }

    #[derive(Insertable)]
    #[diesel(table_name = schedules)]
    pub struct ScheduleFixture {
        pub id: i64,
        pub user_id: i64,
        pub mapping_id: Option<i64>,
        pub mon_start_utc: Option<String>,
        pub mon_end_utc: Option<String>,
    }

    pub fn insert_mapping(db_path: &str, fixture: MappingFixture) {
        let mut conn = establish_connection(db_path).expect("connect");
        diesel::insert_into(channel_mappings::table)
            .values(&fixture)
            .execute(&mut conn)
            .expect("insert mapping fixture");
    }

    pub fn insert_filter(db_path: &str, fixture: FilterFixture) {
        let mut conn = establish_connection(db_path).expect("connect");
        diesel::insert_into(mapping_filters::table)
            .values(&fixture)
            .execute(&mut conn)
            .expect("insert filter fixture");
    }

    pub fn insert_transform(db_path: &str, fixture: TransformFixture) {
        let mut conn = establish_connection(db_path).expect("connect");
        diesel::insert_into(mapping_transforms::table)
            .values(&fixture)
            .execute(&mut conn)
            .expect("insert transform fixture");
    }

    pub fn insert_schedule(db_path: &str, fixture: ScheduleFixture) {
        let mut conn = establish_connection(db_path).expect("connect");
        diesel::insert_into(schedules::table)
            .values(&fixture)
            .execute(&mut conn)
            .expect("insert schedule fixture");
    }

    pub fn insert_account(db_path: &str, id: i64, user_id: i64, session_path: Option<&str>) {
        use crate::db::schema::telegram_accounts;

        #[derive(Insertable)]
        #[diesel(table_name = telegram_accounts)]
        struct AccountFixture<'a> {
            id: i64,
            user_id: i64,
            kind: &'a str,
            session_path: Option<&'a str>,
            status: &'a str,
        }

        let mut conn = establish_connection(db_path).expect("connect");
        diesel::insert_into(telegram_accounts::table)
            .values(&AccountFixture {
                id,
                user_id,
                kind: "user",
                session_path,
                status: "active",
            })
            .execute(&mut conn)
            .expect("insert account fixture");
    }
}
