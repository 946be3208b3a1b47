use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use totem_core::ReturnPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub kiosk: KioskConfig,
    pub metadata: ConfigMetadata,
}

/// How the backend process talks to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Line-delimited JSON over the child's stdio (`--headless`).
    #[default]
    Pipe,
    /// Loopback REST surface polled over HTTP (`--webserver`).
    Http,
}

impl Transport {
    /// Flag passed to the backend executable to select its mode.
    pub const fn mode_flag(self) -> &'static str {
        match self {
            Self::Pipe => "--headless",
            Self::Http => "--webserver",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Http => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTransport(pub String);

impl std::fmt::Display for UnknownTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown transport '{}' (expected pipe or http)", self.0)
    }
}

impl std::error::Error for UnknownTransport {}

impl FromStr for Transport {
    type Err = UnknownTransport;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pipe" | "headless" => Ok(Self::Pipe),
            "http" | "webserver" => Ok(Self::Http),
            other => Err(UnknownTransport(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Path to the backend executable. `None` runs the kiosk in degraded
    /// mode against an already-running webserver backend.
    pub executable: Option<PathBuf>,
    pub transport: Transport,
    pub base_url: String,
    pub readiness_attempts: u32,
    pub readiness_interval: Duration,
    pub request_timeout: Duration,
    pub verify_interval: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            executable: None,
            transport: Transport::Pipe,
            base_url: "http://127.0.0.1:18080".to_string(),
            readiness_attempts: 30,
            readiness_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(2000),
            verify_interval: Duration::from_millis(500),
        }
    }
}

impl BackendConfig {
    /// Working directory for the spawned backend: its own directory, so its
    /// relative paths (database, sensor SDK blobs) resolve as when launched
    /// by hand.
    pub fn working_dir(&self) -> Option<&Path> {
        self.executable.as_deref().and_then(Path::parent)
    }
}

#[derive(Debug, Clone)]
pub struct KioskConfig {
    pub fullscreen: bool,
    pub ticket_return: Duration,
    pub no_match_return: Duration,
    pub error_return: Duration,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            fullscreen: true,
            ticket_return: Duration::from_millis(5000),
            no_match_return: Duration::from_millis(4000),
            error_return: Duration::from_millis(5000),
        }
    }
}

impl KioskConfig {
    pub fn return_policy(&self) -> ReturnPolicy {
        ReturnPolicy {
            ticket: self.ticket_return,
            no_match: self.no_match_return,
            error: self.error_return,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
}
