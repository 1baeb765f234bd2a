//! CLI definitions for cadence.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cron scheduler and background task runtime")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (defaults are used when absent)
    #[arg(short, long, env = "CADENCE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override the control channel address
    #[arg(long, global = true)]
    pub address: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the server in the foreground
    Serve,

    /// Ask a running server to shut down
    Stop,

    /// Show metrics of a running server
    Status {
        /// Refresh every N seconds until interrupted
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },

    /// Task commands
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Cron job commands
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum TaskAction {
    /// List registered task identifiers
    List,

    /// Failed task records
    Failed {
        #[command(subcommand)]
        action: FailedAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum FailedAction {
    /// Show failed tasks, newest first
    View {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Delete every failed task record
    Clear,

    /// Resubmit every failed task through the running server
    Retry {
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
    },
}

#[derive(Subcommand)]
pub(crate) enum CronAction {
    /// List cron jobs with their next run
    List,

    /// Run one cron job now, ignoring its schedule
    Run {
        /// Job identifier
        identifier: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cadence").chain(args.iter().copied())).unwrap()
    }

    #[rstest]
    #[case(&["serve"])]
    #[case(&["stop"])]
    #[case(&["status"])]
    #[case(&["task", "list"])]
    #[case(&["task", "failed", "clear"])]
    #[case(&["cron", "list"])]
    fn parses_plain_subcommands(#[case] args: &[&str]) {
        parse(args);
    }

    #[test]
    fn status_watch_takes_seconds() {
        let cli = parse(&["status", "--watch", "5"]);
        assert!(matches!(cli.command, Commands::Status { watch: Some(5) }));
        assert!(matches!(parse(&["status"]).command, Commands::Status { watch: None }));
    }

    #[test]
    fn failed_view_defaults_and_overrides() {
        let cli = parse(&["task", "failed", "view"]);
        assert!(matches!(
            cli.command,
            Commands::Task {
                action: TaskAction::Failed {
                    action: FailedAction::View { limit: 20, offset: 0 }
                }
            }
        ));

        let cli = parse(&["task", "failed", "view", "--limit", "5", "--offset", "10"]);
        assert!(matches!(
            cli.command,
            Commands::Task {
                action: TaskAction::Failed {
                    action: FailedAction::View { limit: 5, offset: 10 }
                }
            }
        ));
    }

    #[test]
    fn failed_retry_batch_size() {
        let cli = parse(&["task", "failed", "retry"]);
        assert!(matches!(
            cli.command,
            Commands::Task {
                action: TaskAction::Failed {
                    action: FailedAction::Retry { batch_size: 50 }
                }
            }
        ));
        let cli = parse(&["task", "failed", "retry", "--batch-size", "7"]);
        assert!(matches!(
            cli.command,
            Commands::Task {
                action: TaskAction::Failed {
                    action: FailedAction::Retry { batch_size: 7 }
                }
            }
        ));
    }

    #[test]
    fn cron_run_needs_an_identifier() {
        let cli = parse(&["cron", "run", "failed_task_retry"]);
        assert!(matches!(
            cli.command,
            Commands::Cron { action: CronAction::Run { identifier } } if identifier == "failed_task_retry"
        ));
        assert!(Cli::try_parse_from(["cadence", "cron", "run"]).is_err());
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = parse(&["stop", "--address", "10.0.0.5:9502", "--config", "cadence.toml"]);
        assert_eq!(cli.address.as_deref(), Some("10.0.0.5:9502"));
        assert_eq!(cli.config, Some(PathBuf::from("cadence.toml")));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["cadence", "reboot"]).is_err());
    }
}
