//! Kiosk entry point.
//!
//! Loads configuration, starts the backend under supervision, brings up the
//! transport-appropriate event source, and runs until the UI asks to close
//! or the process receives ctrl-c. The window chrome itself lives in the UI
//! shell; this process logs screen transitions and window directives so a
//! headless deployment stays observable.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{broadcast, mpsc, watch};
use totem_config::{Config, ConfigLoad, ConfigLoader, Transport};
use totem_core::Screen;
use totem_kiosk::bridge::BridgeService;
use totem_kiosk::poll::{PollClient, VerifyLoop};
use totem_kiosk::runtime::KioskRuntime;
use totem_kiosk::supervisor::Supervisor;
use totem_kiosk::WindowDirective;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "totem-kiosk", about = "Casino totem kiosk runtime", version)]
struct Cli {
    /// Path to the fingerprint backend executable
    #[arg(long, env = "TOTEM_BACKEND")]
    backend: Option<PathBuf>,

    /// Backend transport: pipe (stdio frames) or http (loopback polling)
    #[arg(long, env = "TOTEM_TRANSPORT")]
    transport: Option<String>,

    /// Base URL of the backend's REST surface on the http transport
    #[arg(long, env = "TOTEM_BASE_URL")]
    base_url: Option<String>,

    /// Path to totem.toml; defaults are searched when omitted
    #[arg(long, env = "TOTEM_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&cli)?;
    run(config).await
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path.clone());
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    if let Some(backend) = &cli.backend {
        config.backend.executable = Some(backend.clone());
    }
    if let Some(transport) = &cli.transport {
        match transport.parse::<Transport>() {
            Ok(transport) => config.backend.transport = transport,
            Err(e) => warn!("ignoring --transport: {e}"),
        }
    }
    if let Some(base_url) = &cli.base_url {
        config.backend.base_url = base_url.clone();
    }

    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration loaded");
    } else {
        info!("no configuration file found, using defaults");
    }
    Ok(config)
}

async fn run(config: Config) -> anyhow::Result<()> {
    let transport = config.backend.transport;
    info!(
        transport = transport.as_str(),
        fullscreen = config.kiosk.fullscreen,
        "kiosk starting"
    );

    let (events_tx, _) = broadcast::channel(64);
    let (screen_tx, screen_rx) = watch::channel(Screen::Waiting);
    let (reset_tx, reset_rx) = mpsc::channel(4);
    let (window_tx, mut window_rx) = mpsc::channel(4);

    // The runtime subscribes before the backend spawns so nothing emitted
    // during startup is missed.
    let runtime = KioskRuntime::spawn(
        config.kiosk.return_policy(),
        events_tx.subscribe(),
        reset_rx,
        screen_tx,
    );

    let mut supervisor = Supervisor::new(config.backend.clone(), events_tx.clone());
    match supervisor.start() {
        Ok(outcome) => debug!(?outcome, "backend supervision established"),
        // The kiosk still comes up so the screen can show something; the
        // sensor features stay dark until the backend is fixed.
        Err(e) => warn!("backend unavailable, running degraded: {e}"),
    }

    let (poll_client, verify_loop) = match transport {
        Transport::Pipe => (None, None),
        Transport::Http => {
            let client = PollClient::new(
                config.backend.base_url.clone(),
                config.backend.request_timeout,
            )?;
            if !client
                .poll_readiness(
                    config.backend.readiness_interval,
                    config.backend.readiness_attempts,
                )
                .await
            {
                warn!("sensor not ready, polling continues degraded");
            }
            let verify_loop = VerifyLoop::spawn(
                client.clone(),
                config.backend.verify_interval,
                screen_rx.clone(),
                events_tx.clone(),
            );
            (Some(client), Some(verify_loop))
        }
    };

    let verify_nudge = verify_loop.as_ref().map(VerifyLoop::nudge_handle);
    let (_ui_bridge, controller) = BridgeService::spawn(
        transport,
        supervisor,
        poll_client,
        verify_nudge,
        reset_tx,
        window_tx,
        events_tx.clone(),
    );

    // Screen transitions go to the log; the UI shell renders them via its
    // own status subscription.
    let mut screen_log_rx = screen_rx.clone();
    tokio::spawn(async move {
        while screen_log_rx.changed().await.is_ok() {
            let screen = *screen_log_rx.borrow();
            info!(?screen, "screen");
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
            directive = window_rx.recv() => match directive {
                Some(WindowDirective::Minimize) => info!("window minimize requested"),
                Some(WindowDirective::Close) | None => {
                    info!("window close requested, shutting down");
                    break;
                }
            }
        }
    }

    // Stop the pollers before tearing down the process handle so nothing
    // races a half-dead backend.
    if let Some(verify_loop) = verify_loop {
        verify_loop.stop().await;
    }
    runtime.stop().await;
    controller.shutdown().await;
    info!("kiosk stopped");
    Ok(())
}
