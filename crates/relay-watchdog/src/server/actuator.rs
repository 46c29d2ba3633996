// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PLC reset actuator.
//!
//! One short-lived TCP connection per command:
//!
//! 1. Connect to the PLC (bounded by the connect timeout)
//! 2. Send `RS <relay>\r\n` (rendered from the configured template)
//! 3. Drain a reply for at most the reply timeout; a missing reply is fine
//! 4. Close
//!
//! Sending the same relay command twice is harmless to the PLC, so callers
//! may actuate one relay concurrently.

use crate::config::{PlcConfig, RELAY_PLACEHOLDER};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Sends relay-reset commands to the PLC.
#[derive(Debug, Clone)]
pub struct PlcActuator {
    endpoint: String,
    command_template: String,
    connect_timeout: Duration,
    reply_timeout: Duration,
    reply_buffer_bytes: usize,
}

impl PlcActuator {
    /// Create an actuator from the PLC configuration.
    pub fn new(config: &PlcConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            command_template: config.command_template.clone(),
            connect_timeout: config.connect_timeout(),
            reply_timeout: config.reply_timeout(),
            reply_buffer_bytes: config.reply_buffer_bytes.max(1),
        }
    }

    /// PLC `host:port`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Render the command for `relay`. Non-ASCII characters are dropped.
    pub fn render_command(&self, relay: &str) -> Vec<u8> {
        self.command_template
            .replace(RELAY_PLACEHOLDER, relay)
            .chars()
            .filter(char::is_ascii)
            .collect::<String>()
            .into_bytes()
    }

    /// Power-cycle `relay`. Returns `true` once the command was sent.
    ///
    /// Never fails past this boundary: errors are logged and reported as
    /// `false`.
    pub async fn reset(&self, relay: &str) -> bool {
        match self.send_command(relay).await {
            Ok(reply_len) => {
                info!(
                    "PLC reset sent for {} via {} (reply {} bytes)",
                    relay, self.endpoint, reply_len
                );
                true
            }
            Err(e) => {
                warn!("PLC send error for {}: {}", relay, e);
                false
            }
        }
    }

    /// Send one command; returns the number of reply bytes drained.
    async fn send_command(&self, relay: &str) -> Result<usize, ActuatorError> {
        let cmd = self.render_command(relay);

        let mut stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(self.endpoint.as_str()),
        )
        .await
        .map_err(|_| ActuatorError::Timeout("connect"))?
        .map_err(ActuatorError::Connect)?;

        tokio::time::timeout(self.connect_timeout, stream.write_all(&cmd))
            .await
            .map_err(|_| ActuatorError::Timeout("send"))??;

        let mut reply = vec![0u8; self.reply_buffer_bytes];
        let drained = tokio::time::timeout(self.reply_timeout, stream.read(&mut reply)).await;
        let reply_len = match drained {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("Ignoring PLC reply error for {}: {}", relay, e);
                0
            }
            Err(_) => 0,
        };

        let _ = stream.shutdown().await;
        Ok(reply_len)
    }
}

/// Actuator error types.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("Connect failed: {0}")]
    Connect(std::io::Error),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
