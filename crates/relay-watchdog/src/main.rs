// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay Watchdog master
//!
//! # Usage
//!
//! ```bash
//! # Write a sample configuration, edit it, then run
//! relay-watchdog gen-config --output watchdog.json
//! relay-watchdog --config watchdog.json
//!
//! # Ad-hoc, without a config file
//! relay-watchdog --plc 192.168.0.99:8501 --slave 192.168.0.100=R500 --slave 192.168.0.101=R501
//!
//! # Check a configuration file
//! relay-watchdog validate --config watchdog.json
//! ```

use clap::{Parser, Subcommand};
use relay_watchdog::{SlaveRecord, WatchdogConfig, WatchdogServer};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Relay Watchdog - power-cycle silent slaves through PLC relays
#[derive(Parser, Debug)]
#[command(name = "relay-watchdog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port slaves report to
    #[arg(short, long, default_value = "50000", conflicts_with = "config")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0", conflicts_with = "config")]
    bind: String,

    /// PLC endpoint (host:port)
    #[arg(long, conflicts_with = "config")]
    plc: Option<String>,

    /// Slave to watch, as IP=RELAY (repeatable)
    #[arg(long = "slave", value_parser = parse_slave, conflicts_with = "config")]
    slaves: Vec<SlaveRecord>,

    /// Heartbeat timeout in seconds
    #[arg(long, default_value = "180", conflicts_with = "config")]
    heartbeat_timeout: u64,

    /// Minimum seconds between monitor resets of one relay (0 = every tick)
    #[arg(long, default_value = "0", conflicts_with = "config")]
    reset_cooldown: u64,

    /// Operational log file (overrides the configuration)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "watchdog.json")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn parse_slave(s: &str) -> Result<SlaveRecord, String> {
    let (ip, relay) = s
        .split_once('=')
        .ok_or_else(|| format!("expected IP=RELAY, got {:?}", s))?;
    let ip = ip
        .trim()
        .parse()
        .map_err(|e| format!("invalid slave address {:?}: {}", ip, e))?;
    Ok(SlaveRecord::new(ip, relay.trim()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = &args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let mut config = build_config(&args)?;
    if args.log_file.is_some() {
        config.log_file = args.log_file.clone();
    }

    init_logging(&args.log_level, config.log_file.as_deref())?;

    info!("+----------------------------------------------------+");
    info!(
        "|       Relay Watchdog v{}                      |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!(
        "|  Bind:    {:39} |",
        format!("{}:{}", config.bind_address, config.port)
    );
    info!("|  PLC:     {:39} |", config.plc.endpoint());
    info!("|  Slaves:  {:39} |", config.slaves.len());
    info!(
        "|  Timeout: {:39} |",
        format!("{}s", config.heartbeat_timeout_secs)
    );
    info!(
        "|  Cooldown:{:39} |",
        if config.reset_cooldown_secs == 0 {
            "none".to_string()
        } else {
            format!("{}s", config.reset_cooldown_secs)
        }
    );
    info!("+----------------------------------------------------+");
    for slave in &config.slaves {
        info!("  {} -> {}", slave.slave_ip, slave.relay);
    }

    let server = WatchdogServer::new(config)?;

    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping watchdog...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Watchdog stopped");
    Ok(())
}

fn build_config(args: &Args) -> Result<WatchdogConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        return Ok(WatchdogConfig::from_file(path)?);
    }

    let mut config = WatchdogConfig {
        bind_address: args.bind.parse()?,
        port: args.port,
        heartbeat_timeout_secs: args.heartbeat_timeout,
        reset_cooldown_secs: args.reset_cooldown,
        slaves: args.slaves.clone(),
        ..Default::default()
    };

    if let Some(plc) = &args.plc {
        let (address, port) = plc
            .rsplit_once(':')
            .ok_or_else(|| format!("--plc expects host:port, got {:?}", plc))?;
        config.plc.address = address.to_string();
        config.plc.port = port.parse()?;
    }

    Ok(config)
}

/// Stdout plus, when configured, an appending plain-text log file.
fn init_logging(level: &str, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()?;

    Ok(())
}

fn cmd_gen_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    WatchdogConfig::sample().to_file(output)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let result = WatchdogConfig::from_file(config_path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Listen: {}:{}", config.bind_address, config.port);
            println!("PLC:    {}", config.plc.endpoint());
            println!("Slaves: {}", config.slaves.len());
            for slave in &config.slaves {
                println!("  {} -> {}", slave.slave_ip, slave.relay);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slave() {
        let slave = parse_slave("10.0.0.5=R9").unwrap();
        assert_eq!(slave.slave_ip.to_string(), "10.0.0.5");
        assert_eq!(slave.relay, "R9");

        assert!(parse_slave("10.0.0.5").is_err());
        assert!(parse_slave("nope=R9").is_err());
    }

    #[test]
    fn test_build_config_from_flags() {
        let args = Args::parse_from([
            "relay-watchdog",
            "--plc",
            "10.0.0.99:9000",
            "--slave",
            "10.0.0.5=R9",
            "--heartbeat-timeout",
            "60",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.plc.address, "10.0.0.99");
        assert_eq!(config.plc.port, 9000);
        assert_eq!(config.heartbeat_timeout_secs, 60);
        assert_eq!(config.slaves.len(), 1);
        assert!(config.validate().is_ok());
    }
}
