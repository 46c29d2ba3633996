// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay Watchdog
//!
//! Master side of a small-fleet watchdog. Slaves report over a plain TCP
//! line protocol; a slave that stays silent past the heartbeat timeout is
//! power-cycled by sending a relay-reset command to a PLC.
//!
//! # Wire protocol (slave -> master)
//!
//! ```text
//! HB\n                         heartbeat (any unrecognised line)
//! SMART {"temperature": 42}\n  disk-health telemetry
//! RESET\n                      power-cycle me now
//! ```
//!
//! # PLC protocol (master -> PLC)
//!
//! One connection per command, `RS <relay>\r\n`; any reply is drained and
//! ignored.
//!
//! # Persisted state
//!
//! - `reset_counts.txt`: one `<relay> <cumulative count>` line per successful reset
//! - `smart_logs/smart_<relay>.jsonl`: one JSON record per telemetry message
//! - operational log (see the `relay-watchdog` binary)

pub mod config;
pub mod server;

pub use config::{ConfigError, PlcConfig, SlaveRecord, WatchdogConfig};
pub use server::{
    LivenessMonitor, LivenessStore, PlcActuator, ResetAttempt, ServerError, SlaveMessage,
    SlaveRegistry, TelemetryRecord, TelemetryRecorder, WatchdogServer,
};
