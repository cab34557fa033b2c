use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_MS: u64 = 1_000; // scheduler poll cadence
pub const DEFAULT_INTERPRETER_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_UNIT_PREFIX: &str = "feature_";
pub const DEFAULT_LOG_FILE_NAME: &str = "execution.log";

/// Top-level config (scriptler.toml + SCRIPTLER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptlerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub install: InstallConfig,
}

/// Where scripts and their logs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: String,
    /// Per-script append-only log, stored next to the script file.
    #[serde(default = "default_log_file_name")]
    pub log_file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            log_file_name: default_log_file_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

/// Commands used to run each language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_node")]
    pub node: String,
    #[serde(default = "default_interpreter_timeout")]
    pub timeout_secs: u64,
    /// Extra import directory that installed units are unpacked into.
    /// Added to `PYTHONPATH` when scripts run.
    pub site_dir: Option<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            node: default_node(),
            timeout_secs: DEFAULT_INTERPRETER_TIMEOUT_SECS,
            site_dir: None,
        }
    }
}

/// Dependency installation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Package id → installable-unit id is `prefix + lowercase(id)`.
    #[serde(default = "default_unit_prefix")]
    pub unit_prefix: String,
    /// When non-empty, only these unit ids are ever requested.
    #[serde(default)]
    pub allowed_units: Vec<String>,
    /// Upper bound on a whole install session, after which it counts as canceled.
    #[serde(default = "default_install_timeout")]
    pub timeout_secs: u64,
    /// How long an unattended session may sit in RequiresConfirmation.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    /// Installer command used by the pip-backed delivery.
    #[serde(default = "default_pip")]
    pub pip: String,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            unit_prefix: default_unit_prefix(),
            allowed_units: Vec::new(),
            timeout_secs: DEFAULT_INSTALL_TIMEOUT_SECS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            pip: default_pip(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
fn default_scripts_dir() -> String {
    format!("{}/.scriptler/scripts", home_dir())
}
fn default_log_file_name() -> String {
    DEFAULT_LOG_FILE_NAME.to_string()
}
fn default_db_path() -> String {
    format!("{}/.scriptler/scheduler.db", home_dir())
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}
fn default_python() -> String {
    "python3".to_string()
}
fn default_node() -> String {
    "node".to_string()
}
fn default_interpreter_timeout() -> u64 {
    DEFAULT_INTERPRETER_TIMEOUT_SECS
}
fn default_unit_prefix() -> String {
    DEFAULT_UNIT_PREFIX.to_string()
}
fn default_install_timeout() -> u64 {
    DEFAULT_INSTALL_TIMEOUT_SECS
}
fn default_confirmation_timeout() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_SECS
}
fn default_pip() -> String {
    "pip3".to_string()
}

impl InterpreterConfig {
    /// `site_dir`, or `~/.scriptler/site` when unset. Package delivery installs
    /// into the same directory.
    pub fn effective_site_dir(&self) -> String {
        self.site_dir
            .clone()
            .unwrap_or_else(|| format!("{}/.scriptler/site", home_dir()))
    }
}

impl ScriptlerConfig {
    /// Load config from a TOML file with SCRIPTLER_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `SCRIPTLER_INSTALL__TIMEOUT_SECS=60`. A missing file is not an error;
    /// every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ScriptlerConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SCRIPTLER_").split("__"))
            .extract()
            .map_err(|e| crate::error::ScriptlerError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    format!("{}/.scriptler/scriptler.toml", home_dir())
}
