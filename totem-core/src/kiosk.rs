//! Kiosk screen state machine.
//!
//! Four screens, one owner, one transition function. All screen mutation is
//! funneled through [`KioskMachine::apply`] so the whole UI policy can be
//! replayed and tested without timers or a rendering surface. The runtime
//! that actually arms tokio timers lives in `totem-kiosk`.
//!
//! Auto-return policy (spec'd, not incidental): approved tickets, ticket
//! rejections, and errors hold their screen for 5 seconds; an unrecognized
//! fingerprint holds for 4.

use crate::event::{BackendEvent, SensorStatus, TicketStatus};
use serde::Serialize;
use std::time::Duration;

/// The screen currently shown to the operator. Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Waiting,
    Processing,
    Approved,
    Rejected,
}

/// What the runtime should do with the auto-return timer after a transition.
///
/// Entering any screen always cancels a previously armed timer first; `Arm`
/// then schedules a fresh return to [`Screen::Waiting`]. Two competing
/// timers can therefore never be outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    None,
    Arm(Duration),
}

/// Result of applying one event: the screen to show and the timer to arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub screen: Screen,
    pub timer: TimerAction,
}

/// Auto-return delays per rejection cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnPolicy {
    pub ticket: Duration,
    pub no_match: Duration,
    pub error: Duration,
}

impl Default for ReturnPolicy {
    fn default() -> Self {
        Self {
            ticket: Duration::from_millis(5000),
            no_match: Duration::from_millis(4000),
            error: Duration::from_millis(5000),
        }
    }
}

/// Process-wide singleton screen state. Initial screen is `Waiting`; there
/// is no terminal state.
#[derive(Debug)]
pub struct KioskMachine {
    screen: Screen,
    policy: ReturnPolicy,
}

impl Default for KioskMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl KioskMachine {
    pub fn new() -> Self {
        Self::with_policy(ReturnPolicy::default())
    }

    pub fn with_policy(policy: ReturnPolicy) -> Self {
        Self {
            screen: Screen::Waiting,
            policy,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// Apply one normalized event.
    ///
    /// Returns `None` for quiescent events that must not move the kiosk
    /// (idle poll results, sensor-unavailable notices, raw passthrough).
    /// `Some` means "show this screen now" even if it is already active --
    /// re-showing replaces the pending auto-return timer, which is what
    /// keeps duplicate result events from racing two timers. Every
    /// `(screen, event)` pair is covered; no input is undefined.
    pub fn apply(&mut self, event: &BackendEvent) -> Option<Transition> {
        let transition = match event {
            BackendEvent::Status { status } => match status {
                SensorStatus::Processing => Transition {
                    screen: Screen::Processing,
                    timer: TimerAction::None,
                },
                SensorStatus::Waiting => Transition {
                    screen: Screen::Waiting,
                    timer: TimerAction::None,
                },
                // Informational only; the waiting screen keeps showing.
                SensorStatus::SensorUnavailable => return None,
            },
            BackendEvent::Ticket { status, .. } => {
                let screen = match status {
                    TicketStatus::Approved => Screen::Approved,
                    TicketStatus::RejectedDouble | TicketStatus::RejectedTime => Screen::Rejected,
                };
                Transition {
                    screen,
                    timer: TimerAction::Arm(self.policy.ticket),
                }
            }
            BackendEvent::NoMatch { quiescent: true } => return None,
            BackendEvent::NoMatch { quiescent: false } => Transition {
                screen: Screen::Rejected,
                timer: TimerAction::Arm(self.policy.no_match),
            },
            BackendEvent::Error { .. } => Transition {
                screen: Screen::Rejected,
                timer: TimerAction::Arm(self.policy.error),
            },
            BackendEvent::Raw { .. } => return None,
        };

        self.screen = transition.screen;
        Some(transition)
    }

    /// Explicit operator reset. Always returns to the waiting screen.
    pub fn reset(&mut self) -> Transition {
        self.screen = Screen::Waiting;
        Transition {
            screen: Screen::Waiting,
            timer: TimerAction::None,
        }
    }

    /// The armed auto-return timer expired.
    pub fn timer_fired(&mut self) -> Transition {
        self.reset()
    }
}
