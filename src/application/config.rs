use std::{
    collections::BTreeMap,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;

use crate::interfaces::netboot_manager::DEFAULT_NETBOOT_MANAGER;

pub const DEFAULT_PORT: u16 = 18890;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "netboot-controller",
    version,
    about = "Netboot controller: device trust and post-boot command queue"
)]
pub struct Args {
    #[arg(long, env = "NETBOOT_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, env = "NETBOOT_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, env = "NETBOOT_GATEWAY_TOKEN")]
    pub gateway_token: Option<String>,

    #[arg(long, env = "NETBOOT_GATEWAY_PASSWORD")]
    pub gateway_password: Option<String>,

    #[arg(long, env = "NETBOOT_MAX_PAYLOAD_BYTES", default_value_t = 1024 * 1024)]
    pub max_payload_bytes: usize,

    #[arg(long, env = "NETBOOT_HANDSHAKE_TIMEOUT_MS", default_value_t = 10_000)]
    pub handshake_timeout_ms: u64,

    #[arg(
        long,
        env = "NETBOOT_DB_PATH",
        default_value = "./.netboot-controller/netboot.db"
    )]
    pub db_path: PathBuf,

    #[arg(long, env = "NETBOOT_MANAGER_PATH", default_value = DEFAULT_NETBOOT_MANAGER)]
    pub netboot_manager: PathBuf,

    /// Serve an in-memory device registry instead of running netboot-manager.
    #[arg(long, env = "NETBOOT_MOCK_DEVICES", default_value_t = false)]
    pub mock_devices: bool,

    /// Identifier of this controller on the message bus.
    #[arg(long, env = "NETBOOT_CONTROLLER_ID")]
    pub controller_id: Option<String>,

    /// Version reported for commands of a module, as `name=version`.
    #[arg(long = "module-version", value_name = "NAME=VERSION")]
    pub module_versions: Vec<String>,

    #[arg(long, env = "NETBOOT_RUNTIME_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub runtime_version: String,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    #[arg(long, env = "NETBOOT_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Token(String),
    Password(String),
}

impl AuthMode {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Token(_) => "token",
            Self::Password(_) => "password",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryBackend {
    NetbootManager(PathBuf),
    Memory,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: IpAddr,
    pub port: u16,
    pub auth_mode: AuthMode,
    pub max_payload_bytes: usize,
    pub handshake_timeout: Duration,
    pub db_path: PathBuf,
    pub registry: RegistryBackend,
    pub controller_id: Option<String>,
    pub module_versions: BTreeMap<String, String>,
    pub runtime_version: String,
    pub log_filter: String,
    pub json_logs: bool,
}

impl RuntimeConfig {
    pub fn from_args(args: Args) -> Result<Self, String> {
        let auth_mode = resolve_auth_mode(args.gateway_token, args.gateway_password)?;

        if args.port == 0 {
            return Err("port must be greater than 0".to_owned());
        }
        if args.max_payload_bytes == 0 {
            return Err("max_payload_bytes must be greater than 0".to_owned());
        }

        let mut module_versions = default_module_versions(&args.runtime_version);
        for entry in &args.module_versions {
            let (name, version) = parse_module_version(entry)?;
            module_versions.insert(name, version);
        }

        let registry = if args.mock_devices {
            RegistryBackend::Memory
        } else {
            RegistryBackend::NetbootManager(args.netboot_manager)
        };

        Ok(Self {
            host: args.host,
            port: args.port,
            auth_mode,
            max_payload_bytes: args.max_payload_bytes,
            handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
            db_path: args.db_path,
            registry,
            controller_id: trim_non_empty(args.controller_id),
            module_versions,
            runtime_version: args.runtime_version,
            log_filter: args.log_filter,
            json_logs: args.json_logs,
        })
    }

    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    #[must_use]
    pub fn for_test(host: IpAddr, port: u16, db_path: PathBuf) -> Self {
        Self {
            host,
            port,
            auth_mode: AuthMode::None,
            max_payload_bytes: 512 * 1024,
            handshake_timeout: Duration::from_millis(3_000),
            db_path,
            registry: RegistryBackend::Memory,
            controller_id: None,
            module_versions: default_module_versions("test"),
            runtime_version: "test".to_owned(),
            log_filter: "warn".to_owned(),
            json_logs: false,
        }
    }
}

fn default_module_versions(runtime_version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("netboot".to_owned(), runtime_version.to_owned())])
}

fn parse_module_version(entry: &str) -> Result<(String, String), String> {
    let Some((name, version)) = entry.split_once('=') else {
        return Err(format!("module version must be NAME=VERSION: {entry}"));
    };
    let name = name.trim();
    let version = version.trim();
    if name.is_empty() || version.is_empty() {
        return Err(format!("module version must be NAME=VERSION: {entry}"));
    }
    Ok((name.to_owned(), version.to_owned()))
}

fn trim_non_empty(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}

fn resolve_auth_mode(token: Option<String>, password: Option<String>) -> Result<AuthMode, String> {
    let token = trim_non_empty(token);
    let password = trim_non_empty(password);

    match (token, password) {
        (Some(_), Some(_)) => Err(
            "set either NETBOOT_GATEWAY_TOKEN or NETBOOT_GATEWAY_PASSWORD, not both".to_owned(),
        ),
        (Some(token), None) => Ok(AuthMode::Token(token)),
        (None, Some(password)) => Ok(AuthMode::Password(password)),
        (None, None) => Ok(AuthMode::None),
    }
}
