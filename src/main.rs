#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::error;

mod chat_id;
mod cli;
mod config;
mod db;
mod relay;
mod rules;
mod supervisor;
mod telegram;
mod utils;
mod worker;

use cli::{Cli, Commands};
use config::Config;
use db::DatabaseManager;
use supervisor::{ExeSpawner, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command,
        config: config_path,
    } = Cli::parse();
    let config = Config::load(&config_path)?;
    utils::logging::init_tracing(&config.logging);

    match command {
        Commands::RunWorker {
            user_id,
            session_path,
            account_id,
        } => {
            let db = open_database(&config).await?;
            if let Err(e) =
                worker::run_worker(&config, &db, user_id, &session_path, account_id).await
            {
                error!("worker crashed: {e:#}");
                std::process::exit(1);
            }
        }
        Commands::InitDb => {
            open_database(&config).await?;
            println!("SQLite schema initialized.");
        }
        Commands::ShowMappings {
            user_id,
            account_id,
        } => {
            let db = open_database(&config).await?;
            let mappings = db
                .mappings()
                .list_enabled_mappings(user_id, account_id)
                .await?;
            println!("{} mapping(s) for user {user_id}:", mappings.len());
            for mapping in mappings {
                println!(
                    "  #{} {} -> {} (filters: {}, transforms: {}, schedule: {})",
                    mapping.id,
                    mapping.source_chat_id,
                    mapping.dest_chat_id,
                    mapping.filters.len(),
                    mapping.transforms.len(),
                    if mapping.schedule.is_some() { "yes" } else { "no" },
                );
            }
        }
        Commands::WorkerStart { account_id } => {
            let supervisor = build_supervisor(&config_path, &config).await?;
            let registration = supervisor.start(account_id).await?;
            println!(
                "Started worker {} for account {} (pid {}).",
                registration.worker_id, registration.account_id, registration.pid
            );
        }
        Commands::WorkerStop { worker_id } => {
            let supervisor = build_supervisor(&config_path, &config).await?;
            supervisor.stop(&worker_id).await?;
            println!("Stopped worker {worker_id}.");
        }
        Commands::WorkersList => {
            let supervisor = build_supervisor(&config_path, &config).await?;
            let workers = supervisor.list().await?;
            if workers.is_empty() {
                println!("No registered workers.");
            }
            for status in workers {
                println!(
                    "{} account={} user={} pid={} running={} session={} started_at={}",
                    status.worker_id,
                    status.account_id,
                    status.user_id,
                    status
                        .pid
                        .map(|pid| pid.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    status.running,
                    status.session_path,
                    status.started_at.to_rfc3339(),
                );
            }
        }
        Commands::WorkersRestart {
            user_id,
            account_id,
        } => {
            let supervisor = build_supervisor(&config_path, &config).await?;
            supervisor.restart_for_mapping(user_id, account_id).await;
            println!("Restart requested for user {user_id}.");
        }
        Commands::RestoreWorkers => {
            let supervisor = build_supervisor(&config_path, &config).await?;
            supervisor.restore_on_boot().await?;
            println!("Worker registry reconciled.");
        }
        Commands::ValidateConfig => {
            // Config::load above already validated.
            println!("Configuration OK.");
        }
        Commands::ShowConfig => {
            println!("SQLite: {}", config.storage.sqlite_path);
            println!("Sessions dir: {}", config.storage.sessions_dir);
            println!("Media assets dir: {}", config.storage.media_assets_dir);
            println!("Data dir: {}", config.storage.data_dir);
            println!("Bot API: {}", config.telegram.api_base_url);
            println!("Poll timeout: {}s", config.worker.poll_timeout_seconds);
            println!("Stop grace: {}s", config.worker.stop_grace_seconds);
        }
    }

    Ok(())
}

async fn open_database(config: &Config) -> Result<DatabaseManager> {
    let db = DatabaseManager::new(&config.storage.sqlite_path);
    db.migrate().await?;
    Ok(db)
}

async fn build_supervisor(config_path: &std::path::Path, config: &Config) -> Result<Supervisor> {
    let db = open_database(config).await?;
    let spawner = Arc::new(ExeSpawner::new(config_path.to_path_buf()));
    Ok(Supervisor::new(
        &db,
        spawner,
        config.storage.data_dir.clone().into(),
        Duration::from_secs(config.worker.stop_grace_seconds),
    ))
}
