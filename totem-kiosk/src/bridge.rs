//! Privileged boundary between the sandboxed UI and the backend.
//!
//! The UI side only ever holds a [`UiBridge`]: a fixed set of request
//! methods plus a status subscription. Everything privileged (the process
//! handle, stdin, the HTTP client) lives inside the service task. Failures
//! cross the boundary as plain result values; a backend problem can degrade
//! the UI but never crash it.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use totem_config::Transport;
use totem_core::BackendEvent;
use totem_core::command::Command;
use tracing::{debug, info, warn};

use crate::poll::PollClient;
use crate::supervisor::Supervisor;

/// Window actions the bridge is allowed to request on behalf of the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDirective {
    Minimize,
    Close,
}

/// Payload of an enrollment request from the maintenance UI.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollRequest {
    pub run: String,
    pub nombre: String,
}

/// Outcome of a command dispatched across the boundary. `success` means the
/// command was handed to the backend, not that the backend acted on it;
/// acknowledgements arrive later on the event stream.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub detail: Option<String>,
}

impl DispatchResult {
    fn dispatched() -> Self {
        Self {
            success: true,
            detail: None,
        }
    }

    fn dispatched_with(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: Some(detail.into()),
        }
    }

    fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
        }
    }
}

/// Result of a maintenance login attempt.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub success: bool,
    pub role: Option<String>,
    pub error: Option<String>,
}

// Single maintenance account, matching what is provisioned on the deployed
// terminals. There is no user database on the kiosk side.
const ADMIN_RUN: &str = "11111111";
const ADMIN_SECRET: &str = "admin123";
const ADMIN_ROLE: &str = "admin";

enum BridgeRequest {
    Minimize,
    Close,
    Login {
        run: String,
        secret: String,
        reply: oneshot::Sender<LoginOutcome>,
    },
    Enroll {
        request: EnrollRequest,
        reply: oneshot::Sender<DispatchResult>,
    },
    Verify {
        reply: oneshot::Sender<DispatchResult>,
    },
    Cancel,
    Reset,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Capability-scoped handle handed to the UI layer.
#[derive(Debug, Clone)]
pub struct UiBridge {
    tx: mpsc::Sender<BridgeRequest>,
    status_tx: broadcast::Sender<BackendEvent>,
}

impl UiBridge {
    pub async fn minimize(&self) {
        let _ = self.tx.send(BridgeRequest::Minimize).await;
    }

    pub async fn close(&self) {
        let _ = self.tx.send(BridgeRequest::Close).await;
    }

    pub async fn login(&self, run: &str, secret: &str) -> LoginOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = BridgeRequest::Login {
            run: run.to_owned(),
            secret: secret.to_owned(),
            reply: reply_tx,
        };
        if self.tx.send(request).await.is_err() {
            return LoginOutcome {
                success: false,
                role: None,
                error: Some("bridge unavailable".into()),
            };
        }
        reply_rx.await.unwrap_or(LoginOutcome {
            success: false,
            role: None,
            error: Some("bridge unavailable".into()),
        })
    }

    pub async fn enroll(&self, request: EnrollRequest) -> DispatchResult {
        self.dispatch(|reply| BridgeRequest::Enroll { request, reply })
            .await
    }

    /// Ask the backend to (re)enter its verification loop. On the pipe
    /// transport the matcher already loops continuously, so this only
    /// acknowledges; on http it forces an immediate poll.
    pub async fn verify(&self) -> DispatchResult {
        self.dispatch(|reply| BridgeRequest::Verify { reply }).await
    }

    pub async fn cancel(&self) {
        let _ = self.tx.send(BridgeRequest::Cancel).await;
    }

    /// Force the kiosk screen back to waiting.
    pub async fn reset(&self) {
        let _ = self.tx.send(BridgeRequest::Reset).await;
    }

    /// Subscribe to the normalized backend event stream. Dropping the
    /// subscription unsubscribes.
    pub fn on_status(&self) -> StatusSubscription {
        StatusSubscription {
            rx: self.status_tx.subscribe(),
        }
    }

    async fn dispatch<F>(&self, make: F) -> DispatchResult
    where
        F: FnOnce(oneshot::Sender<DispatchResult>) -> BridgeRequest,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make(reply_tx)).await.is_err() {
            return DispatchResult::failed("bridge unavailable");
        }
        reply_rx
            .await
            .unwrap_or_else(|_| DispatchResult::failed("bridge unavailable"))
    }
}

/// Receiver half of [`UiBridge::on_status`].
#[derive(Debug)]
pub struct StatusSubscription {
    rx: broadcast::Receiver<BackendEvent>,
}

impl StatusSubscription {
    /// Next event, or `None` once the stream is gone. A lagged subscriber
    /// skips ahead rather than erroring.
    pub async fn next(&mut self) -> Option<BackendEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "status subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Privileged handle kept by the composition root; not exposed to the UI.
#[derive(Debug)]
pub struct BridgeController {
    tx: mpsc::Sender<BridgeRequest>,
    task: JoinHandle<()>,
}

impl BridgeController {
    /// Stop the service task, tearing down the supervised backend first.
    pub async fn shutdown(self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(BridgeRequest::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        let _ = self.task.await;
    }
}

/// The service task owning every privileged resource.
#[derive(Debug)]
pub struct BridgeService {
    transport: Transport,
    supervisor: Supervisor,
    poll_client: Option<PollClient>,
    verify_nudge: Option<mpsc::Sender<()>>,
    reset_tx: mpsc::Sender<()>,
    window_tx: mpsc::Sender<WindowDirective>,
}

impl BridgeService {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        transport: Transport,
        supervisor: Supervisor,
        poll_client: Option<PollClient>,
        verify_nudge: Option<mpsc::Sender<()>>,
        reset_tx: mpsc::Sender<()>,
        window_tx: mpsc::Sender<WindowDirective>,
        status_tx: broadcast::Sender<BackendEvent>,
    ) -> (UiBridge, BridgeController) {
        let (tx, rx) = mpsc::channel(16);
        let service = Self {
            transport,
            supervisor,
            poll_client,
            verify_nudge,
            reset_tx,
            window_tx,
        };
        let task = tokio::spawn(service.run(rx));
        (
            UiBridge {
                tx: tx.clone(),
                status_tx,
            },
            BridgeController { tx, task },
        )
    }

    async fn run(mut self, mut rx: mpsc::Receiver<BridgeRequest>) {
        while let Some(request) = rx.recv().await {
            match request {
                BridgeRequest::Minimize => {
                    let _ = self.window_tx.send(WindowDirective::Minimize).await;
                }
                BridgeRequest::Close => {
                    info!("close requested by UI");
                    let _ = self.window_tx.send(WindowDirective::Close).await;
                }
                BridgeRequest::Login { run, secret, reply } => {
                    let _ = reply.send(check_login(&run, &secret));
                }
                BridgeRequest::Enroll { request, reply } => {
                    let _ = reply.send(self.handle_enroll(request).await);
                }
                BridgeRequest::Verify { reply } => {
                    let _ = reply.send(self.handle_verify().await);
                }
                BridgeRequest::Cancel => self.handle_cancel().await,
                BridgeRequest::Reset => {
                    let _ = self.reset_tx.send(()).await;
                }
                BridgeRequest::Shutdown { reply } => {
                    self.supervisor.stop().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    async fn handle_enroll(&mut self, request: EnrollRequest) -> DispatchResult {
        info!(run = %request.run, "enrollment requested");
        match self.transport {
            Transport::Pipe => {
                let command = Command::Enroll {
                    run: request.run,
                    nombre: request.nombre,
                };
                match self.supervisor.send(&command).await {
                    Ok(()) => DispatchResult::dispatched(),
                    Err(e) => {
                        warn!("enroll dispatch failed: {e}");
                        DispatchResult::failed(e.to_string())
                    }
                }
            }
            Transport::Http => {
                let Some(client) = &self.poll_client else {
                    return DispatchResult::failed("backend http client not configured");
                };
                let command = Command::Enroll {
                    run: request.run,
                    nombre: request.nombre,
                };
                match client.send_command(&command).await {
                    Ok(body) => DispatchResult::dispatched_with(body.to_string()),
                    Err(e) => {
                        warn!("enroll dispatch failed: {e}");
                        DispatchResult::failed(e.to_string())
                    }
                }
            }
        }
    }

    async fn handle_verify(&mut self) -> DispatchResult {
        match self.transport {
            // The pipe-mode matcher verifies continuously; there is nothing
            // to start.
            Transport::Pipe => DispatchResult::dispatched_with("looping"),
            Transport::Http => {
                if let Some(nudge) = &self.verify_nudge {
                    let _ = nudge.send(()).await;
                    DispatchResult::dispatched()
                } else {
                    DispatchResult::failed("verify loop not running")
                }
            }
        }
    }

    async fn handle_cancel(&mut self) {
        match self.transport {
            Transport::Pipe => {
                if let Err(e) = self.supervisor.send(&Command::Cancel).await {
                    warn!("cancel dispatch failed: {e}");
                }
            }
            Transport::Http => {
                debug!("cancel is a no-op on the http transport");
            }
        }
    }
}

fn check_login(run: &str, secret: &str) -> LoginOutcome {
    if run == ADMIN_RUN && secret == ADMIN_SECRET {
        info!("maintenance login accepted");
        LoginOutcome {
            success: true,
            role: Some(ADMIN_ROLE.into()),
            error: None,
        }
    } else {
        warn!("maintenance login rejected");
        LoginOutcome {
            success: false,
            role: None,
            error: Some("credenciales inválidas".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_accepts_only_the_provisioned_account() {
        assert!(check_login("11111111", "admin123").success);
        assert!(!check_login("11111111", "wrong").success);
        assert!(!check_login("22222222", "admin123").success);
        assert!(!check_login("", "").success);
    }

    #[test]
    fn rejected_login_names_no_role() {
        let outcome = check_login("11111111", "nope");
        assert_eq!(outcome.role, None);
        assert!(outcome.error.is_some());
    }
}
