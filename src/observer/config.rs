use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;

use super::prepare_controller_id;

pub const DEFAULT_BUS_PORT: u16 = 18890;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "netboot-observer",
    version,
    about = "Replays queued commands onto devices that finished netbooting"
)]
pub struct ObserverArgs {
    #[arg(short, long, env = "NETBOOT_OBSERVER_DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Host controller id (the one which manages netbooted devices).
    #[arg(long, env = "NETBOOT_CONTROLLER_ID", value_parser = prepare_controller_id)]
    pub controller_id: String,

    #[arg(long, env = "NETBOOT_BUS_HOST", default_value = "localhost")]
    pub host: String,

    #[arg(long, env = "NETBOOT_BUS_PORT", default_value_t = DEFAULT_BUS_PORT)]
    pub port: u16,

    /// Passwd file; its first record authenticates to the bus.
    #[arg(long, env = "NETBOOT_PASSWD_FILE")]
    pub passwd_file: Option<PathBuf>,

    #[arg(long, env = "NETBOOT_OBSERVER_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    #[arg(long, env = "NETBOOT_OBSERVER_RETRY_SECS", default_value_t = 30)]
    pub retry_cooldown_secs: u64,

    #[arg(long, env = "NETBOOT_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub controller_id: String,
    pub bus_url: String,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
    pub retry_cooldown: Duration,
    pub log_filter: String,
    pub json_logs: bool,
}

impl ObserverConfig {
    pub fn from_args(args: ObserverArgs) -> Result<Self, String> {
        if args.port == 0 {
            return Err("port must be greater than 0".to_owned());
        }
        if args.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".to_owned());
        }

        let credentials = match &args.passwd_file {
            Some(path) => Some(read_passwd_file(path)?),
            None => None,
        };

        Ok(Self {
            controller_id: args.controller_id,
            bus_url: format!("ws://{}:{}/ws", args.host, args.port),
            credentials,
            timeout: Duration::from_millis(args.timeout_ms),
            retry_cooldown: Duration::from_secs(args.retry_cooldown_secs),
            log_filter: if args.debug { "debug" } else { "warn" }.to_owned(),
            json_logs: args.json_logs,
        })
    }
}

/// Reads the first `user:password` record of a passwd file.
pub fn read_passwd_file(path: &Path) -> Result<Credentials, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|error| format!("failed to read {}: {error}", path.display()))?;
    parse_passwd(&content).ok_or_else(|| format!("no user:password record in {}", path.display()))
}

fn parse_passwd(content: &str) -> Option<Credentials> {
    let line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))?;
    let (username, password) = line.split_once(':')?;
    if username.is_empty() {
        return None;
    }
    Some(Credentials {
        username: username.to_owned(),
        password: password.to_owned(),
    })
}
