//! Settings provider for the index engine.
//!
//! Configuration is a single TOML document:
//!
//! ```toml
//! local_repository = "/home/me/.m2/repository"
//! index_dir = "/home/me/.quarry/indexes"
//!
//! [proxy]
//! host = "proxy.corp.example"
//! port = 3128
//! non_proxy_hosts = ["localhost", "*.corp.example"]
//!
//! [[remote]]
//! name = "central"
//! repository_url = "https://repo.maven.apache.org/maven2"
//! index_update_url = "https://repo.maven.apache.org/maven2/.index"
//!
//! [update]
//! debounce_ms = 500
//! update_on_startup = true
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! Every section is optional. `QUARRY_CONFIG` points at an explicit config
//! file and `QUARRY_INDEX_DIR` overrides `index_dir`.

use std::path::{Path, PathBuf};
use std::sync::{Once, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub use quarry_fetch::{Credentials, ProxySettings};

pub const QUARRY_CONFIG_ENV_VAR: &str = "QUARRY_CONFIG";
pub const QUARRY_INDEX_DIR_ENV_VAR: &str = "QUARRY_INDEX_DIR";

/// Index names that the manager registers itself.
pub const RESERVED_INDEX_NAMES: [&str; 2] = ["local", "workspace"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuarryConfig {
    /// Root of the local artifact store. Defaults to `~/.m2/repository`.
    #[serde(default)]
    pub local_repository: Option<PathBuf>,

    /// Where index stores and the registry file live. Defaults to
    /// `~/.quarry/indexes`.
    #[serde(default)]
    pub index_dir: Option<PathBuf>,

    #[serde(default)]
    pub proxy: Option<ProxySettings>,

    #[serde(default, rename = "remote")]
    pub remotes: Vec<RemoteIndexConfig>,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIndexConfig {
    pub name: String,
    pub repository_url: String,

    /// Where the index publication lives. Defaults to `<repository_url>/.index`.
    #[serde(default)]
    pub index_update_url: Option<String>,

    /// Index coordinates and checksums only.
    #[serde(default)]
    pub minimal: bool,

    #[serde(default)]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Debounce window applied to background updates.
    #[serde(default = "UpdateConfig::default_debounce_ms")]
    pub debounce_ms: u64,

    /// Schedule a `FetchDelta` for every remote index when the manager starts.
    #[serde(default = "UpdateConfig::default_update_on_startup")]
    pub update_on_startup: bool,
}

impl UpdateConfig {
    fn default_debounce_ms() -> u64 {
        500
    }

    fn default_update_on_startup() -> bool {
        true
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            update_on_startup: Self::default_update_on_startup(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Also append logs to this file. Ignored when it cannot be opened.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            // Anything else is an `EnvFilter` directive string.
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: `level` merged with `RUST_LOG` when it is set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("cannot determine the home directory (HOME/USERPROFILE unset)")]
    MissingHomeDir,
}

fn sanitize_toml_error_message(message: &str) -> String {
    // Messages can embed user-provided scalars (`invalid type: string "secret"`),
    // and config files carry credentials.
    static QUOTED_STRING_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    static BACKTICKED_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();

    let mut out = message.to_owned();
    if let Some(re) = QUOTED_STRING_RE
        .get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#).ok())
    {
        out = re.replace_all(&out, r#""<redacted>""#).into_owned();
    }

    // Only the unexpected value before `, expected ...` is user-controlled;
    // schema names after it stay readable.
    if out.contains("invalid type:")
        || out.contains("invalid value:")
        || out.contains("unknown field")
        || out.contains("unknown variant")
    {
        let boundary = out.find(", expected").unwrap_or(out.len());
        if let Some(re) = BACKTICKED_RE.get_or_init(|| regex::Regex::new(r"`[^`]*`").ok()) {
            let head = re.replace_all(&out[..boundary], "`<redacted>`").into_owned();
            out = format!("{head}{}", &out[boundary..]);
        }
    }

    out
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` for `toml::de::Error` includes a source snippet; keep only
        // the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .ok_or(ConfigError::MissingHomeDir)
}

impl QuarryConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: QuarryConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for remote in &self.remotes {
            let name = remote.name.trim();
            if name.is_empty() {
                return Err(ConfigError::Invalid("remote index name is empty".into()));
            }
            if name
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '.' | '=' | ':' | '/' | '\\'))
            {
                return Err(ConfigError::Invalid(format!(
                    "remote index name `{name}` may not contain whitespace or any of . = : / \\"
                )));
            }
            if RESERVED_INDEX_NAMES.contains(&name) {
                return Err(ConfigError::Invalid(format!(
                    "remote index name `{name}` is reserved"
                )));
            }
            if !seen.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "remote index `{name}` is configured twice"
                )));
            }
        }
        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(ConfigError::Invalid("proxy host is empty".into()));
            }
        }
        Ok(())
    }

    /// Applies `QUARRY_INDEX_DIR`.
    pub fn apply_env_overrides(&mut self) {
        let _guard = config_env_lock().lock();
        if let Some(dir) = std::env::var_os(QUARRY_INDEX_DIR_ENV_VAR).filter(|v| !v.is_empty()) {
            self.index_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn local_repository_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.local_repository {
            Some(dir) => Ok(dir.clone()),
            None => Ok(home_dir()?.join(".m2").join("repository")),
        }
    }

    pub fn index_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.index_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(home_dir()?.join(".quarry").join("indexes")),
        }
    }
}

impl RemoteIndexConfig {
    pub fn effective_index_update_url(&self) -> String {
        match &self.index_update_url {
            Some(url) => url.clone(),
            None => format!("{}/.index", self.repository_url.trim_end_matches('/')),
        }
    }
}

fn config_env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Runs `f` while holding the lock that guards config environment variables.
///
/// Tests that set `QUARRY_CONFIG` or `QUARRY_INDEX_DIR` wrap the mutation and
/// the lookup in this so concurrent tests never observe each other's values.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Finds the config file: `QUARRY_CONFIG` first, then `~/.quarry/config.toml`.
pub fn discover_config_path() -> Option<PathBuf> {
    let explicit = {
        let _guard = config_env_lock().lock();
        std::env::var_os(QUARRY_CONFIG_ENV_VAR).filter(|v| !v.is_empty())
    };
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }
    let candidate = home_dir().ok()?.join(".quarry").join("config.toml");
    candidate.is_file().then_some(candidate)
}

/// Loads the discovered config (or defaults) and applies environment
/// overrides. Returns the path the config was read from, if any.
pub fn load() -> Result<(QuarryConfig, Option<PathBuf>), ConfigError> {
    let path = discover_config_path();
    let mut config = match &path {
        Some(path) => QuarryConfig::load_from_path(path)?,
        None => QuarryConfig::default(),
    };
    config.apply_env_overrides();
    Ok((config, path))
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber.
///
/// Safe to call repeatedly; only the first call has any effect, and an
/// already-installed subscriber from the host is left alone.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_failed = config.file.is_some() && file.is_none();

        let mut make_writer = if config.stderr {
            if cfg!(debug_assertions) {
                // Keeps `cargo test` output captured.
                BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
            } else {
                BoxMakeWriter::new(std::io::stderr)
            }
        } else {
            BoxMakeWriter::new(std::io::sink)
        };
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(std::sync::Mutex::new(file)));
        }

        let layer = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let installed = tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_ok();

        if installed && file_failed {
            tracing::warn!(
                target = "quarry.config",
                path = ?config.file,
                "failed to open log file; file logging disabled"
            );
        }
    });
}
