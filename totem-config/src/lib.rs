//! Configuration for the Totem kiosk.
//!
//! Layered the same way at every deployment: built-in defaults, then an
//! optional `totem.toml`, then `TOTEM_*` environment overrides. Suspicious
//! values degrade to warnings collected on [`ConfigLoad`] rather than
//! aborting startup; an unattended kiosk should come up in degraded mode,
//! not refuse to boot over a typo.

pub mod loader;
pub mod models;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigWarning, ConfigWarnings};
pub use models::{BackendConfig, Config, ConfigMetadata, KioskConfig, Transport};
