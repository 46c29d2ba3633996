// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests: real slave connections over TCP against a fake PLC.

use relay_watchdog::server::telemetry::read_records;
use relay_watchdog::{PlcConfig, SlaveRecord, WatchdogConfig, WatchdogServer};
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Fake PLC: records every command it receives and answers "OK".
async fn fake_plc() -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                if let Ok(n) = sock.read(&mut buf).await {
                    if n > 0 {
                        let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                        let _ = sock.write_all(b"OK\r\n").await;
                    }
                }
            });
        }
    });
    (port, rx)
}

/// Fake PLC that counts commands and never answers.
async fn silent_plc() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                if let Ok(n) = sock.read(&mut buf).await {
                    if n > 0 {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
                tokio::time::sleep(Duration::from_secs(10)).await;
                drop(sock);
            });
        }
    });
    (port, hits)
}

fn test_config(dir: &Path, plc_port: u16) -> WatchdogConfig {
    WatchdogConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        // Unused: tests hand the server a pre-bound listener.
        port: 1,
        idle_timeout_secs: 5,
        reset_counts_path: dir.join("reset_counts.txt"),
        telemetry_dir: dir.join("smart_logs"),
        log_file: None,
        plc: PlcConfig {
            address: "127.0.0.1".into(),
            port: plc_port,
            connect_timeout_ms: 1000,
            reply_timeout_ms: 100,
            ..Default::default()
        },
        slaves: vec![SlaveRecord::new("127.0.0.1".parse().unwrap(), "R9")],
        ..Default::default()
    }
}

async fn start(config: WatchdogConfig) -> (WatchdogServer, SocketAddr) {
    let server = WatchdogServer::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (server, addr)
}

async fn wait_for_count(server: &WatchdogServer, relay: &str, at_least: u64) -> u64 {
    for _ in 0..100 {
        let count = server.reset_count(relay).await;
        if count >= at_least {
            return count;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    server.reset_count(relay).await
}

async fn wait_for_records(path: &Path, n: usize) -> Vec<relay_watchdog::TelemetryRecord> {
    for _ in 0..100 {
        if let Ok(records) = read_records(path) {
            if records.len() >= n {
                return records;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    read_records(path).unwrap_or_default()
}

#[tokio::test]
async fn test_bad_telemetry_does_not_close_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, _plc) = fake_plc().await;
    let (server, addr) = start(test_config(dir.path(), plc_port)).await;

    let mut slave = TcpStream::connect(addr).await.unwrap();
    slave.write_all(b"HB\n").await.unwrap();
    slave.write_all(b"SMART {broken\n").await.unwrap();
    slave
        .write_all(b"SMART {\"temperature_celsius\": 42}\n")
        .await
        .unwrap();

    let path = server.recorder().path_for("R9");
    let records = wait_for_records(&path, 1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].smart, json!({"temperature_celsius": 42}));
    assert_eq!(records[0].reset_count, 0);
    assert_eq!(records[0].relay, "R9");
    assert!(server.last_seen(&"127.0.0.1".parse().unwrap()).await.is_some());

    server.shutdown();
}

#[tokio::test]
async fn test_reset_request_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, mut plc) = fake_plc().await;
    let (server, addr) = start(test_config(dir.path(), plc_port)).await;

    let mut slave = TcpStream::connect(addr).await.unwrap();
    slave.write_all(b"RESET\n").await.unwrap();

    let cmd = tokio::time::timeout(Duration::from_secs(5), plc.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cmd, "RS R9\r\n");
    assert_eq!(wait_for_count(&server, "R9", 1).await, 1);

    // Telemetry sent after the reset sees the new counter value.
    slave.write_all(b"SMART {\"after\": true}\n").await.unwrap();
    let records = wait_for_records(&server.recorder().path_for("R9"), 1).await;
    assert_eq!(records[0].reset_count, 1);

    let persisted = std::fs::read_to_string(dir.path().join("reset_counts.txt")).unwrap();
    assert_eq!(persisted, "R9 1\n");

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reset_requests_all_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, _plc) = fake_plc().await;
    let (server, addr) = start(test_config(dir.path(), plc_port)).await;

    const N: u64 = 20;
    let mut slaves = Vec::new();
    for _ in 0..N {
        let mut slave = TcpStream::connect(addr).await.unwrap();
        slave.write_all(b"RESET\n").await.unwrap();
        slaves.push(slave);
    }

    assert_eq!(wait_for_count(&server, "R9", N).await, N);

    let persisted = std::fs::read_to_string(dir.path().join("reset_counts.txt")).unwrap();
    let lines: Vec<&str> = persisted.lines().collect();
    assert_eq!(lines.len() as u64, N);
    assert_eq!(lines.last().copied(), Some("R9 20"));

    server.shutdown();
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, _plc) = fake_plc().await;
    let config = WatchdogConfig {
        idle_timeout_secs: 1,
        ..test_config(dir.path(), plc_port)
    };
    let (server, addr) = start(config).await;

    let mut slave = TcpStream::connect(addr).await.unwrap();
    slave.write_all(b"HB\n").await.unwrap();

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), slave.read(&mut buf))
        .await
        .expect("server should close the idle connection")
        .unwrap_or(0);
    assert_eq!(n, 0);

    server.shutdown();
}

#[tokio::test]
async fn test_oversized_line_closes_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, _plc) = fake_plc().await;
    let config = WatchdogConfig {
        max_line_bytes: 64,
        ..test_config(dir.path(), plc_port)
    };
    let (server, addr) = start(config).await;

    let mut slave = TcpStream::connect(addr).await.unwrap();
    slave.write_all(&[b'x'; 512]).await.unwrap();

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), slave.read(&mut buf))
        .await
        .expect("server should drop the connection")
        .unwrap_or(0);
    assert_eq!(n, 0);

    server.shutdown();
}

#[tokio::test]
async fn test_monitor_resets_silent_slave() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, mut plc) = fake_plc().await;
    let config = WatchdogConfig {
        heartbeat_timeout_secs: 1,
        check_interval_ms: 100,
        reset_cooldown_secs: 60,
        ..test_config(dir.path(), plc_port)
    };
    let (server, addr) = start(config).await;

    {
        let mut slave = TcpStream::connect(addr).await.unwrap();
        slave.write_all(b"HB\n").await.unwrap();
    }

    let cmd = tokio::time::timeout(Duration::from_secs(5), plc.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cmd, "RS R9\r\n");
    assert_eq!(wait_for_count(&server, "R9", 1).await, 1);

    // The cooldown holds back a second reset.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.reset_count("R9").await, 1);

    server.shutdown();
}

#[tokio::test]
async fn test_serve_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, _plc) = fake_plc().await;
    let (server, _addr) = start(test_config(dir.path(), plc_port)).await;

    for _ in 0..100 {
        if server.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.is_running());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    assert!(matches!(
        server.serve(listener).await,
        Err(relay_watchdog::ServerError::AlreadyRunning)
    ));

    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_during_actuation_stops_monitor() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, hits) = silent_plc().await;
    let mut config = WatchdogConfig {
        heartbeat_timeout_secs: 1,
        check_interval_ms: 100,
        ..test_config(dir.path(), plc_port)
    };
    config.plc.reply_timeout_ms = 800;

    let server = WatchdogServer::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    let serve_task = tokio::spawn(async move { serving.serve(listener).await });

    {
        let mut slave = TcpStream::connect(addr).await.unwrap();
        slave.write_all(b"HB\n").await.unwrap();
    }

    for _ in 0..500 {
        if hits.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let at_shutdown = hits.load(Ordering::SeqCst);
    assert_eq!(at_shutdown, 1);

    // The PLC has not replied yet, so the actuation is still in flight.
    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), serve_task)
        .await
        .expect("serve should return after shutdown")
        .unwrap()
        .unwrap();
    assert!(!server.is_running());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(hits.load(Ordering::SeqCst), at_shutdown);
    // The in-flight reset completed and was counted.
    assert_eq!(server.reset_count("R9").await, 1);
}

#[tokio::test]
async fn test_serve_after_shutdown_returns_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let (plc_port, _plc) = fake_plc().await;
    let server = WatchdogServer::new(test_config(dir.path(), plc_port)).unwrap();

    server.shutdown();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), server.serve(listener))
        .await
        .expect("shutdown before serve must not be lost")
        .unwrap();
    assert!(!server.is_running());
}
