// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slave -> master line protocol.
//!
//! Newline-terminated UTF-8 lines, classified by their full content:
//! ```text
//! SMART <json>   disk-health telemetry
//! RESET...       explicit reset request for the sender's relay
//! <anything>     heartbeat (conventionally "HB")
//! ```
//! Every classified line counts as a liveness signal.

use serde_json::Value;
use thiserror::Error;

/// Prefix of a telemetry line (note the trailing space).
pub const SMART_PREFIX: &str = "SMART ";

/// Prefix of a reset request line.
pub const RESET_PREFIX: &str = "RESET";

/// A classified slave message.
#[derive(Debug, Clone, PartialEq)]
pub enum SlaveMessage {
    /// Liveness only.
    Heartbeat,

    /// Decoded telemetry payload.
    Telemetry(Value),

    /// `SMART ` line whose payload is not valid JSON.
    BadTelemetry(ProtocolError),

    /// Slave asks to be power-cycled.
    ResetRequest,
}

impl SlaveMessage {
    /// Classify one line (terminator already stripped).
    ///
    /// Returns `None` for blank lines, which carry no message at all.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let msg = if let Some(payload) = line.strip_prefix(SMART_PREFIX) {
            match decode_telemetry(payload) {
                Ok(value) => Self::Telemetry(value),
                Err(e) => Self::BadTelemetry(e),
            }
        } else if line.starts_with(RESET_PREFIX) {
            Self::ResetRequest
        } else {
            Self::Heartbeat
        };
        Some(msg)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Telemetry(_) => "telemetry",
            Self::BadTelemetry(_) => "bad-telemetry",
            Self::ResetRequest => "reset-request",
        }
    }
}

/// Decode a telemetry payload.
pub fn decode_telemetry(payload: &str) -> Result<Value, ProtocolError> {
    serde_json::from_str(payload.trim()).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

/// Protocol error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid telemetry JSON: {0}")]
    InvalidJson(String),
}
