use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use reqwest::Url;

use crate::cli::SyncArgs;
use crate::sync::scan::MatchRule;
use crate::types::PartialFailurePolicy;

/// Validated settings for the `sync` command.
pub struct Config {
    pub directory: PathBuf,
    pub rule: MatchRule,
    pub state_file: PathBuf,
    pub scratch_dir: PathBuf,
    pub webhook_url: Url,
    /// Administrative notices; the main webhook when not configured.
    pub log_webhook_url: Url,
    pub role_mention: Option<String>,
    pub user_mention: Option<String>,

    pub max_size_mb: f64,
    pub delay: Duration,
    pub timeout: Duration,
    pub watch_with_interval: Option<u64>,

    pub partial_failure: PartialFailurePolicy,
    pub force: bool,
    pub dry_run: bool,
    pub notify_no_changes: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("directory", &self.directory)
            .field("rule", &self.rule)
            .field("state_file", &self.state_file)
            .field("scratch_dir", &self.scratch_dir)
            .field("webhook_url", &"<redacted>")
            .field("log_webhook_url", &"<redacted>")
            .field("max_size_mb", &self.max_size_mb)
            .field("delay", &self.delay)
            .field("watch_with_interval", &self.watch_with_interval)
            .field("force", &self.force)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn parse_url(flag: &str, raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("{} is not a valid URL", flag))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{} must be an http(s) URL", flag);
    }
    Ok(url)
}

fn non_negative(flag: &str, value: f64) -> anyhow::Result<f64> {
    if !value.is_finite() || value < 0.0 {
        anyhow::bail!("{} must be a non-negative number, got {}", flag, value);
    }
    Ok(value)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_cli(args: SyncArgs) -> anyhow::Result<Self> {
        let directory = args
            .directory
            .as_deref()
            .map(expand_tilde)
            .context("No search directory: pass --directory or set SEARCH_FOLDER")?;

        let webhook_url = non_empty(args.webhook_url)
            .context("No webhook: pass --webhook-url or set MAIN_WEBHOOK_URL")?;
        let webhook_url = parse_url("--webhook-url", &webhook_url)?;
        let log_webhook_url = match non_empty(args.log_webhook_url) {
            Some(raw) => parse_url("--log-webhook-url", &raw)?,
            None => webhook_url.clone(),
        };

        let rule = if args.target_files.is_empty() {
            if args.suffix.is_empty() {
                anyhow::bail!("--suffix must not be empty");
            }
            MatchRule::Prefix {
                prefix: args.prefix,
                suffix: args.suffix,
            }
        } else {
            MatchRule::AllowList(args.target_files)
        };

        let max_size_mb = non_negative("--max-size-mb", args.max_size_mb)?;
        let delay = Duration::from_secs_f64(non_negative("--delay", args.delay)?);
        if args.timeout == 0 {
            anyhow::bail!("--timeout must be at least 1 second");
        }

        let state_file = expand_tilde(&args.state_file);
        // Next to the state file, so it is covered by the same run lock.
        let scratch_dir = args
            .scratch_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(|| state_file.with_extension("staging"));

        Ok(Self {
            directory,
            rule,
            state_file,
            scratch_dir,
            webhook_url,
            log_webhook_url,
            role_mention: non_empty(args.role_mention),
            user_mention: non_empty(args.user_mention),
            max_size_mb,
            delay,
            timeout: Duration::from_secs(args.timeout),
            watch_with_interval: args.watch_with_interval,
            partial_failure: args.partial_failure,
            force: args.force,
            dry_run: args.dry_run,
            notify_no_changes: args.notify_no_changes,
            no_progress_bar: args.no_progress_bar,
        })
    }
}
