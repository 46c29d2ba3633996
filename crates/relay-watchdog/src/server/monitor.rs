// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveness monitor.
//!
//! Every `check_interval` the monitor walks the registry and actuates the
//! relay of each slave that has reported at least once and has been silent
//! for longer than the heartbeat timeout. It is the only component that can
//! act on the *absence* of traffic.
//!
//! The monitor does not refresh `last_seen` after an actuation. With the
//! default zero cooldown a slave that stays silent is reset again on every
//! tick until it reports; a non-zero `reset_cooldown` spaces those retries.

use super::actuator::PlcActuator;
use super::liveness::LivenessStore;
use super::registry::SlaveRegistry;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one monitor-driven actuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetAttempt {
    pub slave_ip: IpAddr,
    pub relay: String,
    /// New cumulative count when the PLC accepted the command.
    pub count: Option<u64>,
}

impl ResetAttempt {
    pub fn succeeded(&self) -> bool {
        self.count.is_some()
    }
}

/// Monitor timing settings.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reset_cooldown: Duration,
}

/// Fixed-cadence staleness scanner.
#[derive(Clone)]
pub struct LivenessMonitor {
    registry: Arc<SlaveRegistry>,
    store: Arc<LivenessStore>,
    actuator: Arc<PlcActuator>,
    config: MonitorConfig,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<SlaveRegistry>,
        store: Arc<LivenessStore>,
        actuator: Arc<PlcActuator>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            actuator,
            config,
        }
    }

    /// Start the monitor task; it runs until `shutdown` turns `true`.
    ///
    /// A tick already in flight finishes its actuations so their counts are
    /// recorded; no tick starts once shutdown is set.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = super::shutdown_requested(&mut shutdown) => break,
                _ = interval.tick() => {}
            }
            self.tick(Instant::now()).await;
        }
        debug!("Liveness monitor shutting down");
    }

    /// Scan once as of `now` and actuate every timed-out slave.
    ///
    /// Actuations of one tick run concurrently; the call returns when all of
    /// them have finished.
    pub async fn tick(&self, now: Instant) -> Vec<ResetAttempt> {
        let mut due = Vec::new();

        for slave in self.registry.slaves() {
            let Some(last) = self.store.last_seen(&slave.slave_ip).await else {
                continue;
            };

            let silent_for = now.saturating_duration_since(last);
            if silent_for <= self.config.heartbeat_timeout {
                continue;
            }

            if !self.config.reset_cooldown.is_zero() {
                if let Some(prev) = self.store.last_actuation(&slave.relay).await {
                    if now.saturating_duration_since(prev) < self.config.reset_cooldown {
                        debug!(
                            "Skipping reset of {} ({}): cooling down",
                            slave.relay, slave.slave_ip
                        );
                        continue;
                    }
                }
            }

            warn!(
                "Heartbeat timeout: {} (relay {}) silent for {}s, sending reset",
                slave.slave_ip,
                slave.relay,
                silent_for.as_secs()
            );
            self.store.mark_actuation(&slave.relay, now).await;
            due.push(slave.clone());
        }

        let mut tasks = JoinSet::new();
        for slave in due {
            let store = self.store.clone();
            let actuator = self.actuator.clone();
            tasks.spawn(async move {
                let count = super::reset_relay(&actuator, &store, &slave.relay).await;
                ResetAttempt {
                    slave_ip: slave.slave_ip,
                    relay: slave.relay,
                    count,
                }
            });
        }

        let mut attempts = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => warn!("Reset task failed: {}", e),
            }
        }

        if !attempts.is_empty() {
            let ok = attempts.iter().filter(|a| a.succeeded()).count();
            info!("Monitor tick: {}/{} resets succeeded", ok, attempts.len());
        }
        attempts
    }
}
