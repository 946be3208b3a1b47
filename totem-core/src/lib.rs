//! # Totem Core
//!
//! Core library for the Totem meal-ticket kiosk, providing the wire protocol
//! spoken with the external fingerprint-matching backend ("the brain") and
//! the deterministic screen state machine that drives the operator-facing UI.
//!
//! ## Overview
//!
//! The backend runs as a separate process and reports verification outcomes
//! over one of two transports: newline-delimited JSON on its stdout, or a
//! loopback REST surface polled over HTTP. Both transports feed the same
//! normalized event vocabulary. This crate owns everything that can be
//! specified without I/O:
//!
//! - [`codec`]: incremental decoder for the line-delimited JSON stream
//! - [`event`]: normalized [`BackendEvent`] model and the ordered mapping
//!   rules that unify the two historical wire schemas
//! - [`kiosk`]: the waiting/processing/approved/rejected screen machine with
//!   its auto-return timer policy
//! - [`command`]: operator intents and their per-transport encodings
//!
//! The process supervisor, HTTP poll client, and UI bridge live in the
//! `totem-kiosk` binary crate and consume these types.

pub mod codec;
pub mod command;
pub mod error;
pub mod event;
pub mod kiosk;

pub use codec::{Line, LineCodec};
pub use command::Command;
pub use error::{Result, TotemError};
pub use event::{BackendEvent, EventKind, SensorStatus, TicketData, TicketStatus, normalize};
pub use kiosk::{KioskMachine, ReturnPolicy, Screen, TimerAction, Transition};
