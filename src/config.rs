//! Process configuration. Loaded once at startup from CLI args overlaid with
//! environment variables, then threaded through every constructor as `Arc<Config>`.
//! No component in this crate reaches for a global to get at these values.

use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

#[derive(Parser, Debug, Clone)]
#[command(name = "netrecon", about = "Network reconnaissance engine")]
pub struct Args {
    /// Initial CIDR to scan, e.g. 192.168.1.0/24. Falls back to NETWORK_RANGE.
    #[arg(long)]
    pub network_range: Option<String>,

    /// Path to the SQLite database file. Falls back to SQLITE_PATH.
    #[arg(long)]
    pub sqlite_path: Option<String>,

    /// HTTP port for the control/query surface. Falls back to WEB_PORT.
    #[arg(long)]
    pub web_port: Option<u16>,
}

/// All tunables recognized by the core, per the external-interfaces contract.
/// Held behind `Arc` and passed by reference; never stored in a static.
#[derive(Debug, Clone)]
pub struct Config {
    pub network_range: String,
    pub sqlite_path: String,
    pub web_port: u16,

    pub sweep_interval: Duration,
    pub workers: usize,
    pub queue_cap: usize,
    pub port_scan_timeout: Duration,
    pub strategy_timeout: Duration,
    pub strategy_retry_timeout: Duration,
    pub idle_after: Duration,
    pub offline_after: Duration,
    pub port_rescan_after: Duration,
    pub hostname_resolver_timeout: Duration,
    pub web_probe_timeout: Duration,

    pub nmap_path: String,
    pub nslookup_path: String,
    pub dig_path: String,

    /// The core only reads presence of these; the HTTP auth collaborator is out of scope.
    pub login_username_set: bool,
    pub login_password_set: bool,
    pub jwt_secret_set: bool,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    env_string(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_string(key)
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Build configuration from parsed CLI args overlaid on the environment.
    /// CLI flags win over environment variables when both are present.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let network_range = args
            .network_range
            .clone()
            .or_else(|| env_string("NETWORK_RANGE"))
            .ok_or(ConfigError::Missing("NETWORK_RANGE"))?;

        let sqlite_path = args
            .sqlite_path
            .clone()
            .or_else(|| env_string("SQLITE_PATH"))
            .or_else(|| env_string("DATABASE_NAME"))
            .unwrap_or_else(|| "netrecon.db".to_string());

        let web_port = args
            .web_port
            .or_else(|| env_string("WEB_PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(8080);

        Ok(Config {
            network_range,
            sqlite_path,
            web_port,
            sweep_interval: env_duration_secs("SWEEP_INTERVAL", Duration::from_secs(30)),
            workers: env_usize("WORKERS", 3),
            queue_cap: env_usize("QUEUE_CAP", 100),
            port_scan_timeout: env_duration_secs("PORT_SCAN_TIMEOUT", Duration::from_secs(120)),
            strategy_timeout: env_duration_secs("STRATEGY_TIMEOUT", Duration::from_secs(20)),
            strategy_retry_timeout: env_duration_secs(
                "STRATEGY_RETRY_TIMEOUT",
                Duration::from_secs(90),
            ),
            idle_after: env_duration_secs("IDLE_AFTER", Duration::from_secs(90)),
            offline_after: env_duration_secs("OFFLINE_AFTER", Duration::from_secs(600)),
            port_rescan_after: env_duration_secs("PORT_RESCAN_AFTER", Duration::from_secs(1800)),
            hostname_resolver_timeout: Duration::from_secs(2),
            web_probe_timeout: Duration::from_secs(15),
            nmap_path: env_string("NMAP_PATH").unwrap_or_else(|| "nmap".to_string()),
            nslookup_path: env_string("NSLOOKUP_PATH").unwrap_or_else(|| "nslookup".to_string()),
            dig_path: env_string("DIG_PATH").unwrap_or_else(|| "dig".to_string()),
            login_username_set: env_string("LOGIN_USERNAME").is_some(),
            login_password_set: env_string("LOGIN_PASSWORD").is_some(),
            jwt_secret_set: env_string("JWT_SECRET_KEY").is_some(),
        })
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Config {
            network_range: "192.168.1.0/24".to_string(),
            sqlite_path: ":memory:".to_string(),
            web_port: 0,
            sweep_interval: Duration::from_secs(30),
            workers: 3,
            queue_cap: 100,
            port_scan_timeout: Duration::from_secs(120),
            strategy_timeout: Duration::from_secs(20),
            strategy_retry_timeout: Duration::from_secs(90),
            idle_after: Duration::from_secs(90),
            offline_after: Duration::from_secs(600),
            port_rescan_after: Duration::from_secs(1800),
            hostname_resolver_timeout: Duration::from_secs(2),
            web_probe_timeout: Duration::from_secs(15),
            nmap_path: "nmap".to_string(),
            nslookup_path: "nslookup".to_string(),
            dig_path: "dig".to_string(),
            login_username_set: false,
            login_password_set: false,
            jwt_secret_set: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_requires_network_range() {
        let args = Args {
            network_range: None,
            sqlite_path: None,
            web_port: None,
        };
        // SAFETY: test runs single-threaded w.r.t. this env var within this process.
        unsafe {
            std::env::remove_var("NETWORK_RANGE");
        }
        assert!(matches!(
            Config::load(&args),
            Err(ConfigError::Missing("NETWORK_RANGE"))
        ));
    }

    #[test]
    fn test_load_cli_wins_over_env() {
        unsafe {
            std::env::set_var("NETWORK_RANGE", "10.0.0.0/24");
        }
        let args = Args {
            network_range: Some("192.168.1.0/24".to_string()),
            sqlite_path: None,
            web_port: None,
        };
        let config = Config::load(&args).unwrap();
        assert_eq!(config.network_range, "192.168.1.0/24");
        unsafe {
            std::env::remove_var("NETWORK_RANGE");
        }
    }

    #[test]
    fn test_load_defaults() {
        let args = Args {
            network_range: Some("192.168.1.0/24".to_string()),
            sqlite_path: None,
            web_port: None,
        };
        let config = Config::load(&args).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_cap, 100);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }
}
