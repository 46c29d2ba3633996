// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Watchdog master core: slave acceptor, per-connection dispatch and the
//! liveness monitor, all sharing one [`LivenessStore`].

use crate::config::WatchdogConfig;
use chrono::Utc;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub mod actuator;
pub mod connection;
pub mod liveness;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod telemetry;

pub use actuator::PlcActuator;
pub use connection::{ConnectionError, SlaveConnection};
pub use liveness::LivenessStore;
pub use monitor::{LivenessMonitor, MonitorConfig, ResetAttempt};
pub use protocol::SlaveMessage;
pub use registry::SlaveRegistry;
pub use telemetry::{TelemetryRecord, TelemetryRecorder};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Resolve once `shutdown` holds `true` or its sender is gone.
///
/// Checks the current value first, so a signal sent before the call is
/// never missed.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Actuate `relay` and, if the PLC took the command, count it.
///
/// Shared by explicit `RESET` requests and the monitor. Returns the new
/// cumulative count on success.
pub async fn reset_relay(
    actuator: &PlcActuator,
    store: &LivenessStore,
    relay: &str,
) -> Option<u64> {
    if !actuator.reset(relay).await {
        return None;
    }
    let count = store.record_reset(relay).await;
    info!("Relay {} reset count is now {}", relay, count);
    Some(count)
}

/// Watchdog master server.
#[derive(Clone)]
pub struct WatchdogServer {
    config: Arc<WatchdogConfig>,
    registry: Arc<SlaveRegistry>,
    store: Arc<LivenessStore>,
    actuator: Arc<PlcActuator>,
    recorder: Arc<TelemetryRecorder>,
    shutdown: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
}

impl WatchdogServer {
    /// Create a new watchdog server.
    pub fn new(config: WatchdogConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let registry = SlaveRegistry::new(config.slaves.iter().cloned());
        let relays = registry.relays();
        let counts_path = config.reset_counts_path.clone();

        let store = if config.reload_counts {
            let reloaded =
                LivenessStore::with_reloaded_counts(relays.iter().copied(), counts_path.clone());
            match reloaded {
                Ok(store) => store,
                Err(e) => {
                    warn!("Could not reload reset counts, starting from 0: {}", e);
                    LivenessStore::new(relays.iter().copied(), counts_path)
                }
            }
        } else {
            LivenessStore::new(relays.iter().copied(), counts_path)
        };

        let actuator = PlcActuator::new(&config.plc);
        let recorder = TelemetryRecorder::new(config.telemetry_dir.clone());

        Ok(Self {
            registry: Arc::new(registry),
            store: Arc::new(store),
            actuator: Arc::new(actuator),
            recorder: Arc::new(recorder),
            config: Arc::new(config),
            shutdown: Arc::new(watch::channel(false).0),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bind the slave-facing listener.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve slaves on an already bound listener.
    ///
    /// Returns after `shutdown` once the monitor has stopped. Shutdown is
    /// final: serving a server that was already shut down returns at once.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        info!("Watchdog listening on {}", local_addr);

        let monitor = self.monitor().spawn(self.shutdown.subscribe());
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("Connection from {}", peer_addr);
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer_addr).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = monitor.await {
            error!("Liveness monitor task failed: {}", e);
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Liveness monitor wired to this server's state.
    pub fn monitor(&self) -> LivenessMonitor {
        LivenessMonitor::new(
            self.registry.clone(),
            self.store.clone(),
            self.actuator.clone(),
            MonitorConfig {
                check_interval: self.config.check_interval(),
                heartbeat_timeout: self.config.heartbeat_timeout(),
                reset_cooldown: self.config.reset_cooldown(),
            },
        )
    }

    /// Read lines from one slave until it closes, idles out, or misbehaves.
    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let slave_ip = peer_addr.ip().to_canonical();
        let mut conn =
            SlaveConnection::new(stream, self.config.idle_timeout(), self.config.max_line_bytes);
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = conn.read_line() => {
                    match result {
                        Ok(Some(line)) => {
                            self.handle_line(slave_ip, &line).await;
                        }
                        Ok(None) => break,
                        Err(ConnectionError::IdleTimeout(idle)) => {
                            info!("Closing idle connection from {} after {:?}", peer_addr, idle);
                            break;
                        }
                        Err(e) => {
                            warn!("Client {} error: {}", peer_addr, e);
                            break;
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    debug!("Connection handler shutting down: {}", peer_addr);
                    break;
                }
            }
        }

        info!("Connection closed {}", peer_addr);
    }

    /// Classify and act on one protocol line from `slave_ip`.
    ///
    /// Every message, known sender or not, refreshes the sender's last-seen
    /// time. Returns the classified message (`None` for blank lines).
    pub async fn handle_line(&self, slave_ip: IpAddr, line: &str) -> Option<SlaveMessage> {
        let msg = SlaveMessage::parse(line)?;
        debug!("{} from {}", msg.kind(), slave_ip);

        self.store.touch(slave_ip).await;

        match &msg {
            SlaveMessage::Heartbeat => {}
            SlaveMessage::Telemetry(smart) => {
                self.record_telemetry(slave_ip, smart.clone()).await;
            }
            SlaveMessage::BadTelemetry(e) => {
                warn!("Dropping SMART message from {}: {}", slave_ip, e);
            }
            SlaveMessage::ResetRequest => match self.registry.relay_for(&slave_ip) {
                Some(relay) => {
                    info!("Received RESET request from {}, relay {}", slave_ip, relay);
                    if reset_relay(&self.actuator, &self.store, relay).await.is_none() {
                        warn!("RESET request from {} not carried out", slave_ip);
                    }
                }
                None => warn!("Ignoring RESET request from unknown IP {}", slave_ip),
            },
        }

        Some(msg)
    }

    async fn record_telemetry(&self, slave_ip: IpAddr, smart: serde_json::Value) {
        let Some(relay) = self.registry.relay_for(&slave_ip) else {
            warn!("Received SMART from unknown IP {}", slave_ip);
            return;
        };

        let reset_count = self.store.reset_count(relay).await;
        let record = TelemetryRecord::new(Utc::now(), slave_ip, relay, reset_count, smart);
        match self.recorder.record(&record).await {
            Ok(path) => info!(
                "Recorded SMART from {} (relay {}, resets {}) to {}",
                slave_ip,
                relay,
                reset_count,
                path.display()
            ),
            Err(e) => error!("Failed writing SMART log for {}: {}", relay, e),
        }
    }

    /// Signal the server to shutdown.
    ///
    /// Level-triggered: tasks that check in later still observe it.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Check if server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current reset counter of `relay`.
    pub async fn reset_count(&self, relay: &str) -> u64 {
        self.store.reset_count(relay).await
    }

    /// Last time `ip` reported.
    pub async fn last_seen(&self, ip: &IpAddr) -> Option<Instant> {
        self.store.last_seen(ip).await
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn registry(&self) -> &SlaveRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<LivenessStore> {
        &self.store
    }

    pub fn recorder(&self) -> &TelemetryRecorder {
        &self.recorder
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
