// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry recorder: append-only JSON-lines log per relay.
//!
//! Files are named `smart_<relay>.jsonl` under the telemetry directory and
//! are never rotated or rewritten. Appends to one file are serialized by a
//! per-relay async lock so concurrent records never interleave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Timestamp format of `recv_time`.
pub const RECV_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One persisted telemetry line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Receipt time (UTC)
    pub recv_time: String,

    /// Sending slave
    pub slave_ip: IpAddr,

    /// Relay wired to the slave
    pub relay: String,

    /// Relay's reset counter when the record was received
    pub reset_count: u64,

    /// Disk-health payload as sent
    pub smart: Value,
}

impl TelemetryRecord {
    pub fn new(
        received_at: DateTime<Utc>,
        slave_ip: IpAddr,
        relay: impl Into<String>,
        reset_count: u64,
        smart: Value,
    ) -> Self {
        Self {
            recv_time: received_at.format(RECV_TIME_FORMAT).to_string(),
            slave_ip,
            relay: relay.into(),
            reset_count,
            smart,
        }
    }
}

/// Telemetry recorder errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Appends telemetry records to per-relay files.
#[derive(Debug)]
pub struct TelemetryRecorder {
    dir: PathBuf,
    file_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TelemetryRecorder {
    /// Create a recorder writing under `dir` (created on first record).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Log file for `relay`.
    pub fn path_for(&self, relay: &str) -> PathBuf {
        self.dir.join(format!("smart_{}.jsonl", relay))
    }

    fn lock_for(&self, relay: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.file_locks
            .lock()
            .entry(relay.to_string())
            .or_default()
            .clone()
    }

    /// Append one record; returns the file written.
    pub async fn record(&self, record: &TelemetryRecord) -> Result<PathBuf, TelemetryError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let path = self.path_for(&record.relay);
        let io_err = |source| TelemetryError::Io {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| TelemetryError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let lock = self.lock_for(&record.relay);
        let _guard = lock.lock().await;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(&line).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        Ok(path)
    }
}

/// Parse a relay log back into records. Unparseable lines are skipped.
pub fn read_records(path: &Path) -> std::io::Result<Vec<TelemetryRecord>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
