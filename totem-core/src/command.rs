//! Operator and administrator intents sent to the backend.
//!
//! The wire form depends on the active transport: piped mode writes one JSON
//! object per line to the backend's stdin; webserver mode maps the same
//! intents onto its loopback REST surface (the poll client owns that
//! mapping). `Stop` and `Cancel` are deliberately distinct messages: `stop`
//! halts the verification loop for good, `cancel` only aborts an in-flight
//! enrollment and lets the loop resume. An earlier protocol revision
//! conflated the two, which left no way back to verification after an
//! aborted enrollment.

use serde_json::json;

/// A tagged request to the backend. Fire-and-forget from the UI's point of
/// view except `Enroll`, whose dispatch (not outcome) is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Register a new fingerprint for the given subject.
    Enroll { run: String, nombre: String },
    /// Abort an in-progress enrollment; the backend returns to verifying.
    Cancel,
    /// Terminate the backend's verification loop entirely.
    Stop,
    /// Select an option from the backend's interactive menu.
    Menu { option: i64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enroll { .. } => "enroll",
            Self::Cancel => "cancel",
            Self::Stop => "stop",
            Self::Menu { .. } => "menu",
        }
    }

    /// Encoding for the piped transport: one JSON object, newline-terminated.
    pub fn pipe_encoding(&self) -> String {
        let value = match self {
            Self::Enroll { run, nombre } => json!({"cmd": "enroll", "run": run, "nombre": nombre}),
            Self::Cancel => json!({"cmd": "cancel"}),
            Self::Stop => json!({"cmd": "stop"}),
            Self::Menu { option } => json!({"cmd": "menu", "option": option}),
        };
        let mut line = value.to_string();
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn decode(line: &str) -> Value {
        assert!(line.ends_with('\n'), "pipe frames are newline-terminated");
        serde_json::from_str(line.trim_end()).expect("pipe frame is valid JSON")
    }

    #[test]
    fn enroll_carries_subject_and_display_name() {
        let cmd = Command::Enroll {
            run: "1-9".to_string(),
            nombre: "Ana".to_string(),
        };
        let value = decode(&cmd.pipe_encoding());
        assert_eq!(value["cmd"], "enroll");
        assert_eq!(value["run"], "1-9");
        assert_eq!(value["nombre"], "Ana");
    }

    #[test]
    fn stop_and_cancel_are_distinct_wire_messages() {
        let stop = decode(&Command::Stop.pipe_encoding());
        let cancel = decode(&Command::Cancel.pipe_encoding());
        assert_eq!(stop["cmd"], "stop");
        assert_eq!(cancel["cmd"], "cancel");
        assert_ne!(stop, cancel);
    }

    #[test]
    fn menu_carries_the_option_index() {
        let value = decode(&Command::Menu { option: 1 }.pipe_encoding());
        assert_eq!(value["cmd"], "menu");
        assert_eq!(value["option"], 1);
    }
}
