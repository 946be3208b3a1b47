use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::models::{BackendConfig, Config, ConfigMetadata, KioskConfig, Transport};

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["totem.toml", "config/totem.toml"];

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("config file not found: {path}")]
    MissingConfig { path: PathBuf },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, message: impl Into<String>, hint: Option<&str>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: hint.map(str::to_string),
        });
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

/// TOML shape. Every field optional; durations in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    backend: FileBackendConfig,
    #[serde(default)]
    kiosk: FileKioskConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileBackendConfig {
    executable: Option<PathBuf>,
    transport: Option<String>,
    base_url: Option<String>,
    readiness_attempts: Option<u32>,
    readiness_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    verify_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileKioskConfig {
    fullscreen: Option<bool>,
    ticket_return_ms: Option<u64>,
    no_match_return_ms: Option<u64>,
    error_return_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("TOTEM_"))
            .collect();
        self.load_with_env(&env)
    }

    /// Same as [`ConfigLoader::load`] but with an explicit environment map,
    /// so tests never have to mutate process-global state.
    pub fn load_with_env(
        &self,
        env: &HashMap<String, String>,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        let (file, config_path) = self.load_file(env)?;
        let mut config = Config {
            backend: BackendConfig::default(),
            kiosk: KioskConfig::default(),
            metadata: ConfigMetadata { config_path },
        };

        if let Some(file) = file {
            apply_file(&mut config, file, &mut warnings);
        }
        apply_env(&mut config, env, &mut warnings);

        if config.backend.readiness_attempts == 0 {
            warnings.push(
                "backend.readiness_attempts is 0; the readiness wait will fail immediately",
                Some("set it to at least 1"),
            );
        }

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file(
        &self,
        env: &HashMap<String, String>,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // Explicit path (flag or env) must exist; default locations are
        // best-effort.
        let explicit = self
            .config_path
            .clone()
            .or_else(|| env.get("TOTEM_CONFIG").map(PathBuf::from));

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => {
                match DEFAULT_CONFIG_LOCATIONS
                    .iter()
                    .map(Path::new)
                    .find(|p| p.exists())
                {
                    Some(found) => found.to_path_buf(),
                    None => return Ok((None, None)),
                }
            }
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file = toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok((Some(file), Some(path)))
    }
}

fn apply_file(config: &mut Config, file: FileConfig, warnings: &mut ConfigWarnings) {
    let backend = file.backend;
    if let Some(executable) = backend.executable {
        config.backend.executable = Some(executable);
    }
    if let Some(transport) = backend.transport {
        match transport.parse::<Transport>() {
            Ok(t) => config.backend.transport = t,
            Err(e) => warnings.push(
                format!("backend.transport: {e}; keeping {}", config.backend.transport.as_str()),
                None,
            ),
        }
    }
    if let Some(base_url) = backend.base_url {
        config.backend.base_url = base_url;
    }
    if let Some(attempts) = backend.readiness_attempts {
        config.backend.readiness_attempts = attempts;
    }
    if let Some(ms) = backend.readiness_interval_ms {
        config.backend.readiness_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = backend.request_timeout_ms {
        config.backend.request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = backend.verify_interval_ms {
        config.backend.verify_interval = Duration::from_millis(ms);
    }

    let kiosk = file.kiosk;
    if let Some(fullscreen) = kiosk.fullscreen {
        config.kiosk.fullscreen = fullscreen;
    }
    if let Some(ms) = kiosk.ticket_return_ms {
        config.kiosk.ticket_return = Duration::from_millis(ms);
    }
    if let Some(ms) = kiosk.no_match_return_ms {
        config.kiosk.no_match_return = Duration::from_millis(ms);
    }
    if let Some(ms) = kiosk.error_return_ms {
        config.kiosk.error_return = Duration::from_millis(ms);
    }
}

fn apply_env(config: &mut Config, env: &HashMap<String, String>, warnings: &mut ConfigWarnings) {
    if let Some(path) = env.get("TOTEM_BACKEND") {
        config.backend.executable = Some(PathBuf::from(path));
    }
    if let Some(raw) = env.get("TOTEM_TRANSPORT") {
        match raw.parse::<Transport>() {
            Ok(t) => config.backend.transport = t,
            Err(e) => warnings.push(
                format!("TOTEM_TRANSPORT: {e}; keeping {}", config.backend.transport.as_str()),
                None,
            ),
        }
    }
    if let Some(url) = env.get("TOTEM_BASE_URL") {
        config.backend.base_url = url.clone();
    }

    if let Some(v) = parse_env_number(env, "TOTEM_READINESS_ATTEMPTS", warnings) {
        match u32::try_from(v) {
            Ok(attempts) => config.backend.readiness_attempts = attempts,
            Err(_) => warnings.push(
                format!("TOTEM_READINESS_ATTEMPTS is out of range: {v}; keeping default"),
                None,
            ),
        }
    }
    if let Some(v) = parse_env_number(env, "TOTEM_READINESS_INTERVAL_MS", warnings) {
        config.backend.readiness_interval = Duration::from_millis(v);
    }
    if let Some(v) = parse_env_number(env, "TOTEM_REQUEST_TIMEOUT_MS", warnings) {
        config.backend.request_timeout = Duration::from_millis(v);
    }
    if let Some(v) = parse_env_number(env, "TOTEM_VERIFY_INTERVAL_MS", warnings) {
        config.backend.verify_interval = Duration::from_millis(v);
    }
}

fn parse_env_number(
    env: &HashMap<String, String>,
    key: &str,
    warnings: &mut ConfigWarnings,
) -> Option<u64> {
    let raw = env.get(key)?;
    match raw.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warnings.push(
                format!("{key} is not a number: '{raw}'; keeping default"),
                None,
            );
            None
        }
    }
}
