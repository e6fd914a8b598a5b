use clap::{Args, Parser, Subcommand};

use crate::types::{LogLevel, PartialFailurePolicy};

#[derive(Parser, Debug)]
#[command(
    name = "pbo-relay",
    version,
    about = "Send changed PBO files to a webhook"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options for the default `sync` command
    #[command(flatten)]
    pub sync: SyncArgs,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check for changed files and send them (default)
    Sync(SyncArgs),
    /// Show tracked files and whether they changed since they were last seen
    Status(StateArgs),
    /// Delete the hash state so every file is sent again
    ResetState(ResetStateArgs),
}

impl Cli {
    /// Bare invocation means `sync` with the top-level options.
    pub fn effective_command(self) -> Command {
        self.command.unwrap_or(Command::Sync(self.sync))
    }
}

#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Hash state file
    #[arg(long, default_value = "~/.pbo-relay/file_hashes.json")]
    pub state_file: String,

    /// Directory holding the tracked files
    #[arg(short = 'd', long, env = "SEARCH_FOLDER")]
    pub directory: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    /// Hash state file
    #[arg(long, default_value = "~/.pbo-relay/file_hashes.json")]
    pub state_file: String,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Directory to search for files (one level, not recursive)
    #[arg(short = 'd', long, env = "SEARCH_FOLDER")]
    pub directory: Option<String>,

    /// Filename prefix of candidate files
    #[arg(long, default_value = "UTF")]
    pub prefix: String,

    /// Filename suffix of candidate files
    #[arg(long, default_value = ".pbo")]
    pub suffix: String,

    /// Explicit filename to track (repeatable). Replaces the prefix rule.
    #[arg(short = 't', long = "target-file")]
    pub target_files: Vec<String>,

    /// Largest compressed size that is still sent, in MiB
    #[arg(long, default_value_t = 8.0)]
    pub max_size_mb: f64,

    /// Webhook that receives the files.
    /// WARNING: passing via --webhook-url is visible in process listings.
    /// Prefer the MAIN_WEBHOOK_URL environment variable instead.
    #[arg(long, env = "MAIN_WEBHOOK_URL", hide_env_values = true)]
    pub webhook_url: Option<String>,

    /// Webhook for administrative notices (defaults to the main webhook)
    #[arg(long, env = "LOG_WEBHOOK_URL", hide_env_values = true)]
    pub log_webhook_url: Option<String>,

    /// Mention placed in the batch announcement, e.g. `<@&123>`
    #[arg(long, env = "ROLE_MENTION")]
    pub role_mention: Option<String>,

    /// Mention placed in error and oversized-file notices, e.g. `<@123>`
    #[arg(long, env = "USER_MENTION")]
    pub user_mention: Option<String>,

    /// Seconds to wait between submitting consecutive deliveries
    #[arg(long, default_value_t = 0.3)]
    pub delay: f64,

    /// Run continuously, waiting N seconds between runs
    #[arg(long)]
    pub watch_with_interval: Option<u64>,

    /// Hash state file
    #[arg(long, default_value = "~/.pbo-relay/file_hashes.json")]
    pub state_file: String,

    /// Where archives are staged before sending (default: next to the state file)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Send every matching file even if unchanged
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Report what would be sent without archiving, sending or saving
    #[arg(long)]
    pub dry_run: bool,

    /// Outcome of a run in which some deliveries failed
    #[arg(long, value_enum, default_value = "success")]
    pub partial_failure: PartialFailurePolicy,

    /// Also notify when nothing changed
    #[arg(long)]
    pub notify_no_changes: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_is_sync_with_defaults() {
        let cli = Cli::try_parse_from(["pbo-relay", "--directory", "/srv/missions"]).unwrap();
        match cli.effective_command() {
            Command::Sync(args) => {
                assert_eq!(args.directory.as_deref(), Some("/srv/missions"));
                assert_eq!(args.prefix, "UTF");
                assert_eq!(args.suffix, ".pbo");
                assert_eq!(args.max_size_mb, 8.0);
                assert_eq!(args.delay, 0.3);
                assert_eq!(args.partial_failure, PartialFailurePolicy::Success);
                assert!(!args.force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn target_files_repeat() {
        let cli = Cli::try_parse_from([
            "pbo-relay",
            "sync",
            "-t",
            "UTF_A.pbo",
            "--target-file",
            "UTF_B.pbo",
            "--partial-failure",
            "error",
        ])
        .unwrap();
        match cli.effective_command() {
            Command::Sync(args) => {
                assert_eq!(args.target_files, vec!["UTF_A.pbo", "UTF_B.pbo"]);
                assert_eq!(args.partial_failure, PartialFailurePolicy::Error);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn reset_state_takes_yes_and_global_log_level() {
        let cli =
            Cli::try_parse_from(["pbo-relay", "reset-state", "--yes", "--log-level", "warn"])
                .unwrap();
        assert_eq!(cli.log_level, LogLevel::Warn);
        assert!(matches!(
            cli.effective_command(),
            Command::ResetState(ResetStateArgs { yes: true, .. })
        ));
    }
}
