//! Command-line and environment configuration.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::persistence::MAX_SAVE_INTERVAL;

/// MiniKV - in-memory key-value server with periodic snapshots
#[derive(Debug, Clone, Parser)]
#[command(name = "mkv-server")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Host or IP address to listen on
    #[arg(long, env = "MKV_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// TCP port to listen on
    #[arg(short, long, env = "MKV_PORT", default_value_t = 1234)]
    pub port: u16,

    /// Snapshot file holding the persisted mapping
    #[arg(short, long, env = "MKV_FILE", default_value = "store.db")]
    pub file: PathBuf,

    /// Time between snapshots: plain seconds, or a number with ms/s/m
    #[arg(
        long = "bg-save-interval",
        env = "MKV_BG_SAVE_INTERVAL",
        default_value = "1s",
        value_parser = parse_interval
    )]
    pub bg_save_interval: Duration,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    /// Resolves `host:port` to the first matching socket address.
    pub async fn resolve_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}:{}", self.host, self.port),
                )
            })
    }
}

/// Parses `250ms`, `5s`, `2m`, or a bare number of seconds.
pub fn parse_interval(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|ch: char| !ch.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid interval '{raw}'"))?;

    let interval = match unit {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => amount
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("interval '{raw}' is too large"))?,
        other => return Err(format!("unknown interval unit '{other}' (use ms, s or m)")),
    };

    if interval.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    if interval > MAX_SAVE_INTERVAL {
        return Err(format!(
            "interval '{raw}' is too large (at most {}s)",
            MAX_SAVE_INTERVAL.as_secs()
        ));
    }
    Ok(interval)
}
