//! Normalized backend event model.
//!
//! Two wire schemas coexist across the backend's history: a `type`-keyed one
//! (`{"type":"ticket","status":"approved","data":{...}}`) emitted by the
//! piped headless loop, and a `status`-keyed one (`{"status":"ready"}`)
//! shared by both transports. The fields are not mutually exclusive, so
//! [`normalize`] applies an ordered rule ladder in one auditable place
//! instead of branching at every call site. Nothing is ever dropped: a
//! payload no rule recognizes is forwarded verbatim as [`BackendEvent::Raw`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Coarse classification of a normalized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ticket,
    NoMatch,
    Status,
    Error,
    Raw,
}

/// Outcome of one verification ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Approved,
    RejectedDouble,
    RejectedTime,
}

/// Backend sensor/loop sub-state, already translated to kiosk vocabulary
/// (`processing_finger` becomes `Processing`, `ready` becomes `Waiting`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Processing,
    Waiting,
    SensorUnavailable,
}

/// Student fields attached to a ticket. The backend omits fields freely, so
/// everything is optional and missing values render as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketData {
    #[serde(default)]
    pub nombre: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub curso: Option<String>,
    #[serde(default)]
    pub racion: Option<String>,
}

/// A single normalized event from either transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendEvent {
    Ticket {
        status: TicketStatus,
        data: TicketData,
    },
    /// Fingerprint read completed without a match. `quiescent` marks the
    /// HTTP poll variant that merely reports "nothing happened" and must not
    /// move the kiosk off its current screen.
    NoMatch { quiescent: bool },
    Status { status: SensorStatus },
    Error { message: String },
    /// Unrecognized payload, forwarded unchanged.
    Raw { payload: Value },
}

impl BackendEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ticket { .. } => EventKind::Ticket,
            Self::NoMatch { .. } => EventKind::NoMatch,
            Self::Status { .. } => EventKind::Status,
            Self::Error { .. } => EventKind::Error,
            Self::Raw { .. } => EventKind::Raw,
        }
    }

    /// Operator-facing reason line for events that land on the rejected
    /// screen. `None` for events that never reject.
    pub fn rejection_reason(&self) -> Option<String> {
        match self {
            Self::Ticket {
                status: TicketStatus::RejectedDouble,
                data,
            } => Some(format!(
                "Ya recibió {} hoy",
                data.racion.as_deref().unwrap_or("la ración")
            )),
            Self::Ticket {
                status: TicketStatus::RejectedTime,
                ..
            } => Some("Fuera del horario de servicio".to_string()),
            Self::NoMatch { quiescent: false } => Some("Huella no reconocida".to_string()),
            Self::Error { .. } => Some("Error del sistema".to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for BackendEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticket { status, .. } => write!(f, "ticket({status:?})"),
            Self::NoMatch { quiescent } => write!(f, "no_match(quiescent: {quiescent})"),
            Self::Status { status } => write!(f, "status({status:?})"),
            Self::Error { message } => write!(f, "error({message})"),
            Self::Raw { .. } => write!(f, "raw"),
        }
    }
}

/// Map a raw decoded object from either transport into a [`BackendEvent`].
///
/// Rules are tried in order; the first match wins. The order is load-bearing
/// because `type` and `status` keys can appear on the same payload.
pub fn normalize(raw: &Value) -> BackendEvent {
    let ty = raw.get("type").and_then(Value::as_str);
    let status = raw.get("status").and_then(Value::as_str);

    if ty == Some("ticket") {
        let ticket_status = match status {
            Some("approved") => Some(TicketStatus::Approved),
            Some("rejected_double") => Some(TicketStatus::RejectedDouble),
            Some("rejected_time") => Some(TicketStatus::RejectedTime),
            _ => None,
        };
        if let Some(ticket_status) = ticket_status {
            let data = raw
                .get("data")
                .and_then(|d| serde_json::from_value(d.clone()).ok())
                .unwrap_or_default();
            return BackendEvent::Ticket {
                status: ticket_status,
                data,
            };
        }
    }

    if ty == Some("no_match") {
        return BackendEvent::NoMatch {
            quiescent: status == Some("waiting"),
        };
    }

    match status {
        Some("processing_finger") => {
            return BackendEvent::Status {
                status: SensorStatus::Processing,
            };
        }
        Some("ready") => {
            return BackendEvent::Status {
                status: SensorStatus::Waiting,
            };
        }
        Some("sensor_unavailable") => {
            return BackendEvent::Status {
                status: SensorStatus::SensorUnavailable,
            };
        }
        _ => {}
    }

    if raw.get("error").is_some() || status == Some("error") {
        let message = raw
            .get("message")
            .or_else(|| raw.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| raw.to_string());
        return BackendEvent::Error { message };
    }

    BackendEvent::Raw {
        payload: raw.clone(),
    }
}
