use chrono::Utc;
use clap::Parser;
use mr_core::config::MAX_INTERVAL_HOURS;
use mr_core::logging::init_logging;
use mr_core::{ReportStorage, Result, Settings};
use mr_scrapers::{handle_command, ComparisonManager, ReportCommands};
use mr_storage::{RetentionHandle, RetentionScheduler};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Debug, Clone)]
struct HumanDuration(Duration);

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut total_seconds = 0u64;
        let mut current_number = String::new();
        let mut has_unit = false;

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_number.push(c);
            } else if let Ok(num) = current_number.parse::<u64>() {
                let unit = match c {
                    's' => 1,
                    'm' => 60,
                    'h' => 3600,
                    'd' => 86400,
                    _ => return Err(format!("Invalid duration unit: {}", c)),
                };
                total_seconds = num
                    .checked_mul(unit)
                    .and_then(|secs| total_seconds.checked_add(secs))
                    .ok_or_else(|| format!("Duration too large: {}", s))?;
                current_number.clear();
                has_unit = true;
            } else if !c.is_whitespace() {
                return Err(format!("Invalid character in duration: {}", c));
            }
        }

        // a bare number is seconds
        if !current_number.is_empty() {
            match current_number.parse::<u64>() {
                Ok(num) => {
                    total_seconds = total_seconds
                        .checked_add(num)
                        .ok_or_else(|| format!("Duration too large: {}", s))?;
                    has_unit = true;
                }
                Err(_) => return Err("Invalid number in duration".to_string()),
            }
        }

        if !has_unit {
            return Err("Duration must include a number".to_string());
        }
        if total_seconds == 0 {
            return Err("Duration must be positive".to_string());
        }
        if total_seconds > MAX_INTERVAL_HOURS * 3600 {
            return Err(format!("Duration is at most {}h", MAX_INTERVAL_HOURS));
        }

        Ok(HumanDuration(Duration::from_secs(total_seconds)))
    }
}

#[derive(Parser, Debug)]
#[command(name = "mandela", author, version, about = "Compare a web page with its archived past", long_about = None)]
pub struct Cli {
    /// Report storage backend: sqlite or memory
    #[arg(long, env = "MANDELA_STORAGE", default_value = "sqlite")]
    storage: String,

    /// SQLite database file
    #[arg(long, env = "MANDELA_DB_PATH")]
    db_path: Option<String>,

    /// Log debug output
    #[arg(long, short)]
    verbose: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Reports(ReportCommands),
    /// Delete expired reports once and exit
    Purge,
    /// Run the retention sweep in the foreground until interrupted
    Retain {
        /// Sweep interval (e.g. 30m, 6h, 1d); defaults to the configured hours
        #[arg(long)]
        interval: Option<HumanDuration>,
    },
}

fn scheduler(storage: Arc<dyn ReportStorage>, settings: &Settings, interval: Duration) -> RetentionScheduler {
    RetentionScheduler::new(storage, interval).with_vacuum(settings.vacuum_after_purge)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logger = init_logging(if cli.verbose { Level::DEBUG } else { Level::INFO });
    cli.settings.validate()?;

    let storage = mr_storage::create_storage(&cli.storage, cli.db_path.as_deref()).await?;
    logger.info(&format!("🏦 Storage ready (using {})", cli.storage));

    match cli.command {
        Commands::Reports(command) => {
            let retention: Option<RetentionHandle> = if cli.settings.retention_enabled {
                Some(
                    scheduler(storage.clone(), &cli.settings, cli.settings.retention_interval())
                        .start(),
                )
            } else {
                None
            };

            let manager = ComparisonManager::from_settings(cli.settings.clone(), storage)?;
            let result = handle_command(command, &manager).await;

            if let Some(handle) = retention {
                handle.stop().await;
            }
            result?;
        }
        Commands::Purge => {
            let outcome = scheduler(storage, &cli.settings, cli.settings.retention_interval())
                .sweep(Utc::now())
                .await?;
            println!(
                "🧹 Purged {} of {} expired reports ({} failed)",
                outcome.deleted, outcome.expired, outcome.failed
            );
        }
        Commands::Retain { interval } => {
            let interval = interval
                .map(|d| d.0)
                .unwrap_or_else(|| cli.settings.retention_interval());
            info!("🧹 Sweeping every {}s; press Ctrl-C to stop", interval.as_secs());
            let handle = scheduler(storage, &cli.settings, interval).start();
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("⚠️ Failed to listen for Ctrl-C: {}", e);
            }
            handle.stop().await;
        }
    }

    Ok(())
}
