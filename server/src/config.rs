use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::vm::DEFAULT_MAX_STACK;

/// EagleHub loader server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "eaglehub-server", version, about = "EagleHub script loader server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "EAGLEHUB_PORT", default_value = "5000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "EAGLEHUB_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./eaglehub.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "EAGLEHUB_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for the SQLite database
    #[arg(long, env = "EAGLEHUB_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Route and delivery settings (loaded from [loader] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderConfig>,

    /// Environment probe settings (loaded from [environment] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
}

/// Ephemeral route and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Lifetime of an ephemeral route in seconds (default: 120)
    #[serde(default = "default_route_ttl")]
    pub route_ttl_secs: i64,

    /// Length of generated route names (default: 8)
    #[serde(default = "default_route_name_length")]
    pub route_name_length: usize,

    /// Prefix for access URLs returned at route creation. Empty gives
    /// server-relative URLs.
    #[serde(default)]
    pub public_base_url: String,

    /// Stack cap for the VM dry run and the delivered VM stub (default: 4096)
    #[serde(default = "default_vm_max_stack")]
    pub vm_max_stack: usize,

    /// Per-IP burst on delivery and route creation (default: 20)
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    /// Seconds to replenish one request of the burst (default: 3)
    #[serde(default = "default_rate_limit_replenish")]
    pub rate_limit_replenish_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            route_ttl_secs: default_route_ttl(),
            route_name_length: default_route_name_length(),
            public_base_url: String::new(),
            vm_max_stack: default_vm_max_stack(),
            rate_limit_burst: default_rate_limit_burst(),
            rate_limit_replenish_secs: default_rate_limit_replenish(),
        }
    }
}

fn default_route_ttl() -> i64 {
    120
}

fn default_route_name_length() -> usize {
    8
}

fn default_vm_max_stack() -> usize {
    DEFAULT_MAX_STACK
}

fn default_rate_limit_burst() -> u32 {
    20
}

fn default_rate_limit_replenish() -> u64 {
    3
}

/// Suspicious-environment probe settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Process environment variables whose presence refuses service
    #[serde(default)]
    pub suspicious_vars: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./eaglehub.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            loader: Some(LoaderConfig::default()),
            environment: Some(EnvironmentConfig::default()),
        }
    }
}

/// Values given explicitly on the command line. Clap fills every field
/// with its default, so only flags the user actually passed go into the
/// top layer.
#[derive(Debug, Default, Serialize)]
struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_logs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generate_config: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_dir: Option<String>,
}

fn given<T: Clone>(matches: &ArgMatches, id: &str, value: &T) -> Option<T> {
    (matches.value_source(id) == Some(ValueSource::CommandLine)).then(|| value.clone())
}

impl CliOverrides {
    fn from_matches(cli: &Config, matches: &ArgMatches) -> Self {
        Self {
            port: given(matches, "port", &cli.port),
            bind_address: given(matches, "bind_address", &cli.bind_address),
            config: given(matches, "config", &cli.config),
            json_logs: given(matches, "json_logs", &cli.json_logs),
            generate_config: given(matches, "generate_config", &cli.generate_config),
            data_dir: given(matches, "data_dir", &cli.data_dir),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (EAGLEHUB_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_matches(&Config::command().get_matches())
    }

    /// Same layering as [`Config::load`] over already parsed arguments.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, figment::Error> {
        let cli = Config::from_arg_matches(matches)
            .map_err(|e| figment::Error::from(e.to_string()))?;

        let config: Config = Self::figment(&cli.config)
            .merge(Serialized::defaults(CliOverrides::from_matches(&cli, matches)))
            .extract()?;
        config.validate()
    }

    /// Defaults, TOML file and environment, without the CLI layer.
    pub fn figment(config_path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("EAGLEHUB_").split("__"))
    }

    fn validate(self) -> Result<Self, figment::Error> {
        if let Some(loader) = &self.loader {
            if loader.route_name_length == 0 {
                return Err(figment::Error::from(
                    "loader.route_name_length must be at least 1".to_string(),
                ));
            }
        }
        Ok(self)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# EagleHub Loader Server Configuration
# Place this file at ./eaglehub.toml or specify with --config <path>
# All settings can be overridden via environment variables (EAGLEHUB_PORT,
# EAGLEHUB_LOADER__ROUTE_TTL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# ---- Ephemeral Routes ----
# [loader]

# Seconds a freshly created route stays usable (default: 120)
# route_ttl_secs = 120

# Length of generated route names (default: 8)
# route_name_length = 8

# Prefix for access URLs returned at route creation, e.g. "https://hub.example"
# Empty returns server-relative URLs
# public_base_url = ""

# Stack cap for the VM dry run and the delivered VM stub (default: 4096)
# vm_max_stack = 4096

# Per-IP rate limit on delivery and route creation
# rate_limit_burst = 20
# rate_limit_replenish_secs = 3

# ---- Environment Probe ----
# [environment]

# Refuse route creation and delivery while any of these is set
# suspicious_vars = ["LD_PRELOAD"]
"#
    .to_string()
}
