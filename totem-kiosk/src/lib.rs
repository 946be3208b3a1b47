//! Kiosk runtime binary crate.
//!
//! Wires the pieces from `totem-core` and `totem-config` into a running
//! kiosk: the backend process supervisor, the HTTP poll client for the
//! webserver transport, the screen runtime, and the privileged bridge the
//! UI talks to. The library surface exists so integration tests can drive
//! each piece against fakes.

pub mod bridge;
pub mod poll;
pub mod runtime;
pub mod supervisor;

pub use bridge::{BridgeController, BridgeService, UiBridge, WindowDirective};
pub use poll::{PollClient, VerifyLoop};
pub use runtime::KioskRuntime;
pub use supervisor::{ExitState, StartOutcome, Supervisor};
