//! Kiosk screen runtime.
//!
//! Single task that owns the [`KioskMachine`], applies every event from the
//! broadcast stream in arrival order, and publishes the current screen on a
//! watch channel. Auto-return timers are guarded by a generation counter:
//! every transition bumps the generation, so a timer armed for a screen that
//! has since been replaced fires into the void instead of yanking a newer
//! result off the display.

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use totem_core::{BackendEvent, KioskMachine, ReturnPolicy, Screen, TimerAction};
use tracing::{debug, warn};

/// Handle to the spawned runtime task.
#[derive(Debug)]
pub struct KioskRuntime {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl KioskRuntime {
    /// Spawn the runtime. `reset_rx` carries explicit UI-triggered resets;
    /// `screen_tx` is where every screen change is published.
    pub fn spawn(
        policy: ReturnPolicy,
        events_rx: broadcast::Receiver<BackendEvent>,
        reset_rx: mpsc::Receiver<()>,
        screen_tx: watch::Sender<Screen>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run(policy, events_rx, reset_rx, screen_tx, shutdown_rx));
        Self { shutdown_tx, task }
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

async fn run(
    policy: ReturnPolicy,
    mut events_rx: broadcast::Receiver<BackendEvent>,
    mut reset_rx: mpsc::Receiver<()>,
    screen_tx: watch::Sender<Screen>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut machine = KioskMachine::with_policy(policy);
    let mut timer_gen: u64 = 0;
    let (timer_tx, mut timer_rx) = mpsc::channel::<u64>(8);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(()) = reset_rx.recv() => {
                timer_gen += 1;
                let transition = machine.reset();
                debug!(screen = ?transition.screen, "explicit reset");
                screen_tx.send_replace(transition.screen);
            }
            event = events_rx.recv() => match event {
                Ok(event) => {
                    let Some(transition) = machine.apply(&event) else {
                        continue;
                    };
                    // Any transition invalidates a pending auto-return.
                    timer_gen += 1;
                    debug!(kind = ?event.kind(), screen = ?transition.screen, "screen transition");
                    screen_tx.send_replace(transition.screen);
                    if let TimerAction::Arm(delay) = transition.timer {
                        let generation = timer_gen;
                        let timer_tx = timer_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = timer_tx.send(generation).await;
                        });
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "kiosk event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(generation) = timer_rx.recv() => {
                if generation != timer_gen {
                    continue;
                }
                timer_gen += 1;
                let transition = machine.timer_fired();
                debug!("auto-return to waiting");
                screen_tx.send_replace(transition.screen);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use totem_core::{SensorStatus, TicketData, TicketStatus};

    use super::*;

    fn ticket(status: TicketStatus) -> BackendEvent {
        BackendEvent::Ticket {
            status,
            data: TicketData {
                nombre: Some("ANA SOTO".into()),
                run: Some("12345678".into()),
                curso: Some("3A".into()),
                racion: Some("almuerzo".into()),
            },
        }
    }

    fn harness() -> (
        broadcast::Sender<BackendEvent>,
        mpsc::Sender<()>,
        watch::Receiver<Screen>,
        KioskRuntime,
    ) {
        let (events_tx, events_rx) = broadcast::channel(16);
        let (reset_tx, reset_rx) = mpsc::channel(4);
        let (screen_tx, screen_rx) = watch::channel(Screen::Waiting);
        let runtime = KioskRuntime::spawn(ReturnPolicy::default(), events_rx, reset_rx, screen_tx);
        (events_tx, reset_tx, screen_rx, runtime)
    }

    #[tokio::test(start_paused = true)]
    async fn approved_ticket_auto_returns_after_five_seconds() {
        let (events_tx, _reset_tx, mut screen_rx, runtime) = harness();

        events_tx.send(ticket(TicketStatus::Approved)).unwrap();
        screen_rx.changed().await.unwrap();
        assert_eq!(*screen_rx.borrow(), Screen::Approved);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(*screen_rx.borrow(), Screen::Approved);

        screen_rx.changed().await.unwrap();
        assert_eq!(*screen_rx.borrow(), Screen::Waiting);

        runtime.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_ticket_replaces_pending_timer() {
        let (events_tx, _reset_tx, mut screen_rx, runtime) = harness();

        events_tx.send(ticket(TicketStatus::Approved)).unwrap();
        screen_rx.changed().await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        events_tx.send(ticket(TicketStatus::Approved)).unwrap();
        screen_rx.changed().await.unwrap();
        assert_eq!(*screen_rx.borrow(), Screen::Approved);

        // The first timer expires at t=5s but its generation is stale.
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert_eq!(*screen_rx.borrow(), Screen::Approved);

        // The second ticket's timer governs: back to waiting at t=8s.
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(*screen_rx.borrow(), Screen::Waiting);

        runtime.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_reset_cancels_pending_timer() {
        let (events_tx, reset_tx, mut screen_rx, runtime) = harness();

        events_tx.send(ticket(TicketStatus::RejectedDouble)).unwrap();
        screen_rx.changed().await.unwrap();
        assert_eq!(*screen_rx.borrow(), Screen::Rejected);

        reset_tx.send(()).await.unwrap();
        screen_rx.changed().await.unwrap();
        assert_eq!(*screen_rx.borrow(), Screen::Waiting);

        // The orphaned timer changes nothing when it finally fires.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*screen_rx.borrow(), Screen::Waiting);

        runtime.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn opaque_events_leave_screen_untouched() {
        let (events_tx, _reset_tx, screen_rx, runtime) = harness();

        events_tx
            .send(BackendEvent::Raw {
                payload: json!({ "supervisor": "backend_exited", "code": 1 }),
            })
            .unwrap();
        events_tx
            .send(BackendEvent::Status {
                status: SensorStatus::SensorUnavailable,
            })
            .unwrap();
        // Drain the scheduler so the runtime has seen both events.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*screen_rx.borrow(), Screen::Waiting);
        assert!(!screen_rx.has_changed().unwrap());

        runtime.stop().await;
    }
}
