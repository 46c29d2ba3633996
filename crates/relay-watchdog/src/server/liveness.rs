// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveness store: last-seen times per slave address and reset counters per
//! relay.
//!
//! This is the only shared mutable state of the master. Every connection
//! handler and the liveness monitor go through the operations below; the map
//! itself is never exposed. One async mutex guards the maps. Counts-log
//! appends are serialized by a second mutex that is taken before the
//! increment and held through the write, so two concurrent resets of one
//! relay always produce two distinct, ordered lines (`R9 4`, `R9 5`) while
//! heartbeats never wait on the disk.
//!
//! Lock order is always append lock, then state lock.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Counts-log errors.
#[derive(Debug, Error)]
pub enum CountsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default)]
struct StoreInner {
    last_seen: HashMap<IpAddr, Instant>,
    counts: HashMap<String, u64>,
    last_actuation: HashMap<String, Instant>,
}

/// Shared liveness and reset-counter state.
#[derive(Debug)]
pub struct LivenessStore {
    inner: Mutex<StoreInner>,
    append_lock: Mutex<()>,
    counts_path: PathBuf,
}

impl LivenessStore {
    /// Create a store with every relay at 0.
    pub fn new<'a>(relays: impl IntoIterator<Item = &'a str>, counts_path: PathBuf) -> Self {
        let counts = relays.into_iter().map(|r| (r.to_string(), 0)).collect();
        Self {
            inner: Mutex::new(StoreInner {
                counts,
                ..Default::default()
            }),
            append_lock: Mutex::new(()),
            counts_path,
        }
    }

    /// Create a store whose counters resume from the last value the counts
    /// log holds for each relay. A missing log means all zeros.
    pub fn with_reloaded_counts<'a>(
        relays: impl IntoIterator<Item = &'a str>,
        counts_path: PathBuf,
    ) -> Result<Self, CountsError> {
        let persisted = load_counts(&counts_path)?;
        let mut store = Self::new(relays, counts_path);
        let inner = store.inner.get_mut();
        for (relay, count) in persisted {
            if let Some(slot) = inner.counts.get_mut(&relay) {
                *slot = count;
            } else {
                debug!("Ignoring persisted count for unconfigured relay {}", relay);
            }
        }
        Ok(store)
    }

    /// Record traffic from `ip` now.
    pub async fn touch(&self, ip: IpAddr) {
        self.touch_at(ip, Instant::now()).await;
    }

    /// Record traffic from `ip` at `at`.
    pub async fn touch_at(&self, ip: IpAddr, at: Instant) {
        self.inner.lock().await.last_seen.insert(ip, at);
    }

    /// Last time `ip` sent anything, if ever.
    pub async fn last_seen(&self, ip: &IpAddr) -> Option<Instant> {
        self.inner.lock().await.last_seen.get(ip).copied()
    }

    /// Current reset counter for `relay` (0 if never reset).
    pub async fn reset_count(&self, relay: &str) -> u64 {
        self.inner
            .lock()
            .await
            .counts
            .get(relay)
            .copied()
            .unwrap_or(0)
    }

    /// Count one successful reset of `relay` and append it to the counts log.
    ///
    /// Returns the new cumulative count. A failed append is logged; the
    /// in-memory count is still incremented.
    pub async fn record_reset(&self, relay: &str) -> u64 {
        let _append = self.append_lock.lock().await;
        let count = {
            let mut inner = self.inner.lock().await;
            let slot = inner.counts.entry(relay.to_string()).or_insert(0);
            *slot += 1;
            *slot
        };

        if let Err(e) = append_count(&self.counts_path, relay, count).await {
            error!("Failed to persist reset count {} for {}: {}", count, relay, e);
        }

        count
    }

    /// Remember that the monitor actuated `relay` at `at`.
    pub async fn mark_actuation(&self, relay: &str, at: Instant) {
        self.inner
            .lock()
            .await
            .last_actuation
            .insert(relay.to_string(), at);
    }

    /// When the monitor last actuated `relay`.
    pub async fn last_actuation(&self, relay: &str) -> Option<Instant> {
        self.inner.lock().await.last_actuation.get(relay).copied()
    }
}

async fn append_count(path: &Path, relay: &str, count: u64) -> Result<(), CountsError> {
    let io_err = |source| CountsError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_err)?;
    file.write_all(format!("{} {}\n", relay, count).as_bytes())
        .await
        .map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}

/// Read the counts log and return the last count per relay.
pub fn load_counts(path: &Path) -> Result<HashMap<String, u64>, CountsError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(source) => {
            return Err(CountsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut counts = HashMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next().map(str::parse::<u64>), parts.next()) {
            (Some(relay), Some(Ok(count)), None) => {
                counts.insert(relay.to_string(), count);
            }
            _ => warn!(
                "Skipping malformed line {} in {}: {:?}",
                lineno + 1,
                path.display(),
                line
            ),
        }
    }
    Ok(counts)
}
