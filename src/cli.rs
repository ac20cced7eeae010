use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "telegram-relay")]
#[command(about = "Telegram chat relay", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Run a relay worker for one Telegram account session")]
    RunWorker {
        user_id: i64,

        session_path: PathBuf,

        #[arg(long, help = "Telegram account ID (filters mappings)")]
        account_id: Option<i64>,
    },

    #[command(about = "Create the SQLite schema")]
    InitDb,

    #[command(about = "Print the mappings a worker would load")]
    ShowMappings {
        user_id: i64,

        #[arg(long, help = "Telegram account ID (filters mappings)")]
        account_id: Option<i64>,
    },

    #[command(about = "Start a worker for a Telegram account")]
    WorkerStart {
        #[arg(long)]
        account_id: i64,
    },

    #[command(about = "Stop a running worker")]
    WorkerStop { worker_id: String },

    #[command(about = "List registered workers")]
    WorkersList,

    #[command(about = "Restart workers for a user after a mapping change")]
    WorkersRestart {
        user_id: i64,

        #[arg(long)]
        account_id: Option<i64>,
    },

    #[command(about = "Reattach or respawn workers recorded in the registry")]
    RestoreWorkers,

    #[command(about = "Validate the configuration file")]
    ValidateConfig,

    #[command(about = "Print non-sensitive resolved settings")]
    ShowConfig,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_worker_parses_positional_and_optional_args() {
        let cli = Cli::parse_from([
            "telegram-relay",
            "run-worker",
            "7",
            "data/sessions/a.session",
            "--account-id",
            "3",
        ]);
        match cli.command {
            Commands::RunWorker {
                user_id,
                session_path,
                account_id,
            } => {
                assert_eq!(user_id, 7);
                assert_eq!(session_path, PathBuf::from("data/sessions/a.session"));
                assert_eq!(account_id, Some(3));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_path_defaults_and_overrides() {
        let cli = Cli::parse_from(["telegram-relay", "init-db"]);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));

        let cli = Cli::parse_from(["telegram-relay", "--config", "other.yaml", "init-db"]);
        assert_eq!(cli.config, PathBuf::from("other.yaml"));
    }
}
