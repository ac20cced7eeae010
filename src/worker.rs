//! Worker process: one live chat session and relay pipeline per Telegram
//! account. Spawned by the supervisor via the `run-worker` subcommand and
//! expected to block until the transport disconnects.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::DatabaseManager;
use crate::relay::RelayHandler;
use crate::telegram::{BotApiSession, Session};

/// Copy the session file to a private per-process path. The session file is
/// mutable state, so two workers sharing one file would corrupt each other;
/// if the copy fails the original path is used with a warning.
fn private_session_copy(session_path: &Path) -> PathBuf {
    let stem = session_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("session");
    let extension = session_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("session");
    let private = session_path
        .with_file_name(format!("{stem}-{}.{extension}", Uuid::new_v4()));

    match std::fs::copy(session_path, &private) {
        Ok(_) => private,
        Err(e) => {
            warn!(
                "failed to copy session file {} to {}: {e}; using the original path",
                session_path.display(),
                private.display()
            );
            session_path.to_path_buf()
        }
    }
}

pub async fn run_worker(
    config: &Config,
    db: &DatabaseManager,
    user_id: i64,
    session_path: &Path,
    account_id: Option<i64>,
) -> Result<()> {
    info!(user_id, ?account_id, "worker starting");

    let mappings = db
        .mappings()
        .list_enabled_mappings(user_id, account_id)
        .await
        .context("failed to load mapping snapshot")?;
    if mappings.is_empty() {
        warn!(
            user_id,
            ?account_id,
            "no enabled mappings loaded; worker will idle until restarted"
        );
    }

    let private_path = private_session_copy(session_path);
    let owns_copy = private_path != session_path;

    let session = BotApiSession::connect(&config.telegram, &config.worker, &private_path)
        .await
        .context("failed to establish Telegram session")?;
    info!(user_id, "worker connected");

    let handler = RelayHandler::new(user_id, mappings, db.reply_index(), db.audit_log());
    info!(
        user_id,
        mappings = handler.mapping_count(),
        "worker running"
    );

    let result = pump_events(&session, &handler).await;

    if owns_copy && let Err(e) = std::fs::remove_file(&private_path) {
        warn!(
            "failed to remove private session copy {}: {e}",
            private_path.display()
        );
    }

    result
}

async fn pump_events(session: &BotApiSession, handler: &RelayHandler) -> Result<()> {
    loop {
        match session.next_event().await.context("event stream failed")? {
            Some(event) => handler
                .handle_event(session, &event)
                .await
                .context("relay pipeline failed")?,
            None => {
                info!("worker disconnected");
                return Ok(());
            }
        }
    }
}
