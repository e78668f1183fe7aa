use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub staging_dir: String,
    /// How long finished uploads stay visible before the sweep purges them.
    pub retention_hours: i64,
    /// How often the retention sweep runs.
    pub sweep_interval_secs: u64,
    /// Bound of the notification queue; overflow drops snapshots.
    pub notify_queue_capacity: usize,
    /// Telegram credentials, environment-only. Both must be present for
    /// chat notifications; otherwise snapshots are logged.
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload progress tracking and notification service")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_TRACKER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_TRACKER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where direct uploads are staged (overrides UPLOAD_TRACKER_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Retention window for finished uploads, in hours (overrides UPLOAD_TRACKER_RETENTION_HOURS)
    #[arg(long)]
    pub retention_hours: Option<i64>,

    /// Interval between retention sweeps, in seconds (overrides UPLOAD_TRACKER_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Notification queue capacity (overrides UPLOAD_TRACKER_NOTIFY_QUEUE_CAPACITY)
    #[arg(long)]
    pub notify_queue_capacity: Option<usize>,
}

/// Read an environment variable and parse it, falling back to `default`
/// when unset.
fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("UPLOAD_TRACKER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed("UPLOAD_TRACKER_PORT", 3000u16)?;
        let env_staging =
            env::var("UPLOAD_TRACKER_STAGING_DIR").unwrap_or_else(|_| "./data/staging".into());
        let env_retention = env_parsed("UPLOAD_TRACKER_RETENTION_HOURS", 24i64)?;
        let env_sweep = env_parsed("UPLOAD_TRACKER_SWEEP_INTERVAL_SECS", 3600u64)?;
        let env_capacity = env_parsed("UPLOAD_TRACKER_NOTIFY_QUEUE_CAPACITY", 256usize)?;

        // Credentials stay out of argv; environment only.
        let telegram_bot_token = env::var("UPLOAD_TRACKER_TELEGRAM_BOT_TOKEN").ok();
        let telegram_chat_id = env::var("UPLOAD_TRACKER_TELEGRAM_CHAT_ID").ok();

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            staging_dir: args.staging_dir.unwrap_or(env_staging),
            retention_hours: args.retention_hours.unwrap_or(env_retention),
            sweep_interval_secs: args.sweep_interval_secs.unwrap_or(env_sweep),
            notify_queue_capacity: args.notify_queue_capacity.unwrap_or(env_capacity),
            telegram_bot_token,
            telegram_chat_id,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
