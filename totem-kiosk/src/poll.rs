//! HTTP poll client for the backend's loopback REST surface.
//!
//! On the http transport the backend exposes a small API on localhost
//! instead of writing frames to stdout: a sensor status endpoint, a
//! verification endpoint the kiosk polls while idle, and a command endpoint.
//! Every request carries the configured timeout so a wedged backend can
//! never stall the kiosk.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use totem_core::command::Command;
use totem_core::{BackendEvent, Result, Screen, TotemError, normalize};
use tracing::{debug, info, warn};

const SENSOR_STATUS_PATH: &str = "/api/sensor/status";
const VERIFY_PATH: &str = "/api/verify_finger";
const MENU_PATH: &str = "/api/Cmenu";
const ENROLL_PATH: &str = "/api/students";

#[derive(Debug, Clone)]
pub struct PollClient {
    http: reqwest::Client,
    base_url: String,
}

impl PollClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TotemError::Http(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// One readiness probe. Anything other than a 2xx body with
    /// `{"available": true}` counts as not ready, including connection
    /// failures while the backend is still booting.
    pub async fn check_readiness(&self) -> bool {
        let resp = match self.http.get(self.url(SENSOR_STATUS_PATH)).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("sensor status probe failed: {e}");
                return false;
            }
        };
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "sensor status probe rejected");
            return false;
        }
        match resp.json::<Value>().await {
            Ok(body) => body
                .get("available")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Err(e) => {
                debug!("sensor status body unreadable: {e}");
                false
            }
        }
    }

    /// Probe until the sensor reports available, up to `max_attempts` spaced
    /// `interval` apart. Returns false once the budget is exhausted.
    pub async fn poll_readiness(&self, interval: Duration, max_attempts: u32) -> bool {
        for attempt in 1..=max_attempts {
            if self.check_readiness().await {
                info!(attempt, "backend sensor ready");
                return true;
            }
            debug!(attempt, max_attempts, "backend sensor not ready yet");
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }
        warn!(max_attempts, "backend never reported a ready sensor");
        false
    }

    /// One verification poll. A 2xx response yields its JSON body, a 503
    /// means the sensor dropped out mid-session, and anything else
    /// (including no response at all) yields nothing.
    pub async fn poll_verification(&self) -> Option<Value> {
        let resp = match self.http.get(self.url(VERIFY_PATH)).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("verification poll failed: {e}");
                return None;
            }
        };
        if resp.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Some(json!({ "status": "sensor_unavailable" }));
        }
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "verification poll rejected");
            return None;
        }
        resp.json().await.ok()
    }

    /// Liveness ping against the command endpoint.
    pub async fn ping(&self) -> bool {
        self.http
            .post(self.url(MENU_PATH))
            .json(&json!({ "ping": true }))
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }

    /// POST a command to the backend. Cancel and stop have no HTTP
    /// equivalent; the backend manages its own capture loop on this
    /// transport.
    pub async fn send_command(&self, command: &Command) -> Result<Value> {
        let (path, body) = match command {
            Command::Menu { option } => (MENU_PATH, json!({ "option": option })),
            Command::Enroll { run, nombre } => {
                (ENROLL_PATH, json!({ "run": run, "nombre": nombre }))
            }
            Command::Cancel | Command::Stop => {
                return Err(TotemError::UnsupportedTransport("http"));
            }
        };
        let resp = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| TotemError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TotemError::Http(format!(
                "{path} returned {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(|e| TotemError::Http(e.to_string()))
    }
}

/// Background verification poller for the http transport.
///
/// Ticks at the configured interval but only issues a request while the
/// kiosk is on the waiting screen, so a student looking at their result is
/// never interrupted by a fresh match. A nudge forces one immediate poll
/// regardless of the tick.
#[derive(Debug)]
pub struct VerifyLoop {
    shutdown_tx: mpsc::Sender<()>,
    nudge_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl VerifyLoop {
    pub fn spawn(
        client: PollClient,
        interval: Duration,
        screen_rx: watch::Receiver<Screen>,
        events_tx: broadcast::Sender<BackendEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (nudge_tx, nudge_rx) = mpsc::channel(4);
        let task = tokio::spawn(run_verify_loop(
            client,
            interval,
            screen_rx,
            events_tx,
            shutdown_rx,
            nudge_rx,
        ));
        Self {
            shutdown_tx,
            nudge_tx,
            task,
        }
    }

    /// Sender that forces an immediate poll on the next scheduler pass.
    pub fn nudge_handle(&self) -> mpsc::Sender<()> {
        self.nudge_tx.clone()
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

async fn run_verify_loop(
    client: PollClient,
    interval: Duration,
    screen_rx: watch::Receiver<Screen>,
    events_tx: broadcast::Sender<BackendEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    mut nudge_rx: mpsc::Receiver<()>,
) {
    debug!(interval_ms = interval.as_millis() as u64, "verify loop running");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(()) = nudge_rx.recv() => {
                poll_once(&client, &events_tx).await;
            }
            _ = tokio::time::sleep(interval) => {
                if *screen_rx.borrow() != Screen::Waiting {
                    continue;
                }
                poll_once(&client, &events_tx).await;
            }
        }
    }
    debug!("verify loop stopped");
}

async fn poll_once(client: &PollClient, events_tx: &broadcast::Sender<BackendEvent>) {
    if let Some(raw) = client.poll_verification().await {
        let event = normalize(&raw);
        debug!(kind = ?event.kind(), "verification event");
        let _ = events_tx.send(event);
    }
}
