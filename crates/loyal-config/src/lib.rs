//! loyal-config
//!
//! Process configuration, built once at start-up and passed explicitly.
//!
//! Precedence per setting: command-line flag, then environment variable,
//! then the optional YAML file (`--config`), then the built-in default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub use file::{load_file, parse_file_str, FileConfig};

pub const DEFAULT_RUN_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Upper bound for the resync period.
pub const MAX_RESYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound for query timeout, retry delay and rate-limit pauses.
pub const MAX_WORKER_PAUSE: Duration = Duration::from_secs(60 * 60);

/// Command-line surface of the daemon.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "loyal-daemon", version, about = "Loyalty points ledger service")]
pub struct CliArgs {
    /// HTTP listen address (host:port).
    #[arg(short = 'a', long = "run-address", env = "RUN_ADDRESS")]
    pub run_address: Option<String>,

    /// Postgres connection URI.
    #[arg(short = 'd', long = "database-uri", env = "DATABASE_URI")]
    pub database_uri: Option<String>,

    /// Base URL of the accrual authority.
    #[arg(short = 'r', long = "accrual-address", env = "ACCRUAL_SYSTEM_ADDRESS")]
    pub accrual_address: Option<String>,

    /// Optional YAML tuning file (database/worker sections).
    #[arg(long = "config", env = "LOYAL_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "LOYAL_WORKER_CONCURRENCY")]
    pub worker_concurrency: Option<usize>,

    /// Seconds between full resyncs from storage; 0 disables.
    #[arg(long, env = "LOYAL_RESYNC_INTERVAL_SECS")]
    pub resync_interval_secs: Option<u64>,

    #[arg(long, env = "LOYAL_QUERY_TIMEOUT_MS")]
    pub query_timeout_ms: Option<u64>,

    #[arg(long, env = "LOYAL_RATE_LIMIT_COOLDOWN_MS")]
    pub rate_limit_cooldown_ms: Option<u64>,

    /// Ceiling for a server-supplied `Retry-After`.
    #[arg(long, env = "LOYAL_MAX_RATE_LIMIT_COOLDOWN_MS")]
    pub max_rate_limit_cooldown_ms: Option<u64>,

    #[arg(long, env = "LOYAL_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,

    /// Stop retrying an order after N non-terminal results (default: never).
    #[arg(long, env = "LOYAL_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    pub run_address: String,
    /// Contains credentials; log [`ServiceConfig::redacted_database_uri`] instead.
    pub database_uri: String,
    pub db_max_connections: u32,
    pub accrual_address: String,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub resync_interval: Duration,
    pub query_timeout: Duration,
    pub max_attempts: Option<u32>,
    pub retry_delay: Duration,
    pub rate_limit_cooldown: Duration,
    pub max_rate_limit_cooldown: Duration,
    pub honor_retry_after: bool,
}

impl ServiceConfig {
    /// Parse process args/env, read the optional file and validate.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Merge flags/env over file values over defaults, then validate.
    pub fn resolve(args: CliArgs, file: FileConfig) -> Result<Self> {
        let retry = &file.worker.retry;
        let ms = Duration::from_millis;

        let cfg = ServiceConfig {
            run_address: args
                .run_address
                .unwrap_or_else(|| DEFAULT_RUN_ADDRESS.to_string()),
            database_uri: args.database_uri.unwrap_or_default(),
            db_max_connections: file
                .database
                .max_connections
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
            accrual_address: normalize_base_url(&args.accrual_address.unwrap_or_default()),
            worker: WorkerSettings {
                concurrency: args
                    .worker_concurrency
                    .or(file.worker.concurrency)
                    .unwrap_or(DEFAULT_WORKER_CONCURRENCY),
                resync_interval: args
                    .resync_interval_secs
                    .or(file.worker.resync_interval_secs)
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RESYNC_INTERVAL),
                query_timeout: args
                    .query_timeout_ms
                    .or(file.worker.query_timeout_ms)
                    .map(ms)
                    .unwrap_or(DEFAULT_QUERY_TIMEOUT),
                max_attempts: args.max_attempts.or(retry.max_attempts),
                retry_delay: args
                    .retry_delay_ms
                    .or(retry.retry_delay_ms)
                    .map(ms)
                    .unwrap_or(Duration::ZERO),
                rate_limit_cooldown: args
                    .rate_limit_cooldown_ms
                    .or(retry.rate_limit_cooldown_ms)
                    .map(ms)
                    .unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN),
                max_rate_limit_cooldown: args
                    .max_rate_limit_cooldown_ms
                    .or(retry.max_rate_limit_cooldown_ms)
                    .map(ms)
                    .unwrap_or(DEFAULT_MAX_RATE_LIMIT_COOLDOWN),
                honor_retry_after: retry.honor_retry_after.unwrap_or(true),
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !is_host_port(&self.run_address) {
            bail!(
                "CONFIG_RUN_ADDRESS_INVALID: expected host:port, got '{}'",
                self.run_address
            );
        }
        if self.database_uri.trim().is_empty() {
            bail!("CONFIG_DATABASE_URI_MISSING: set -d or DATABASE_URI");
        }
        if self.accrual_address.is_empty() {
            bail!("CONFIG_ACCRUAL_ADDRESS_MISSING: set -r or ACCRUAL_SYSTEM_ADDRESS");
        }
        if self.db_max_connections == 0 {
            bail!("CONFIG_DB_MAX_CONNECTIONS_INVALID: must be >= 1");
        }
        if self.worker.concurrency == 0 {
            bail!("CONFIG_WORKER_CONCURRENCY_INVALID: must be >= 1");
        }
        if self.worker.query_timeout.is_zero() {
            bail!("CONFIG_QUERY_TIMEOUT_INVALID: must be > 0");
        }
        check_at_most(
            "CONFIG_RESYNC_INTERVAL_INVALID",
            self.worker.resync_interval,
            MAX_RESYNC_INTERVAL,
        )?;
        check_at_most(
            "CONFIG_QUERY_TIMEOUT_INVALID",
            self.worker.query_timeout,
            MAX_WORKER_PAUSE,
        )?;
        check_at_most(
            "CONFIG_RETRY_DELAY_INVALID",
            self.worker.retry_delay,
            MAX_WORKER_PAUSE,
        )?;
        check_at_most(
            "CONFIG_RATE_LIMIT_COOLDOWN_INVALID",
            self.worker.rate_limit_cooldown,
            MAX_WORKER_PAUSE,
        )?;
        check_at_most(
            "CONFIG_MAX_RATE_LIMIT_COOLDOWN_INVALID",
            self.worker.max_rate_limit_cooldown,
            MAX_WORKER_PAUSE,
        )?;
        if self.worker.max_attempts == Some(0) {
            bail!("CONFIG_MAX_ATTEMPTS_INVALID: must be >= 1 when set");
        }
        Ok(())
    }

    pub fn redacted_database_uri(&self) -> String {
        redact_dsn(&self.database_uri)
    }

    /// Stable hash of the effective config with credentials redacted, for
    /// start-up logs.
    pub fn config_hash(&self) -> String {
        let redacted = ServiceConfig {
            database_uri: self.redacted_database_uri(),
            ..self.clone()
        };
        // Plain struct with string/number fields; serialization cannot fail.
        let canonical = serde_json::to_string(&redacted).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn check_at_most(code: &str, value: Duration, max: Duration) -> Result<()> {
    if value > max {
        bail!("{code}: {}s exceeds the {}s limit", value.as_secs(), max.as_secs());
    }
    Ok(())
}

fn is_host_port(s: &str) -> bool {
    match s.rsplit_once(':') {
        Some((_, port)) => port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Trim, add `http://` when no scheme is given, drop a trailing `/`.
fn normalize_base_url(raw: &str) -> String {
    let t = raw.trim().trim_end_matches('/');
    if t.is_empty() {
        return String::new();
    }
    if t.starts_with("http://") || t.starts_with("https://") {
        t.to_string()
    } else {
        format!("http://{t}")
    }
}

/// Hide the password of a Postgres DSN, URL form (`postgres://u:p@h/db`) or
/// key/value form (`host=h password=p`).
pub fn redact_dsn(dsn: &str) -> String {
    if let Some((scheme, rest)) = dsn.split_once("://") {
        if let Some((userinfo, host)) = rest.rsplit_once('@') {
            if let Some((user, _)) = userinfo.split_once(':') {
                return format!("{scheme}://{user}:REDACTED@{host}");
            }
        }
        return dsn.to_string();
    }

    dsn.split_whitespace()
        .map(|kv| match kv.split_once('=') {
            Some((k, _)) if k.eq_ignore_ascii_case("password") => format!("{k}=REDACTED"),
            _ => kv.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
