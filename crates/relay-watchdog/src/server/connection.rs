// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slave connection handling: newline framing with an idle timeout and a
//! bounded line buffer.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

const READ_CHUNK: usize = 4096;

/// A connected slave.
pub struct SlaveConnection<S = TcpStream> {
    stream: S,
    idle_timeout: Duration,
    max_line_bytes: usize,
    read_buffer: Vec<u8>,
    /// Prefix of `read_buffer` already known to hold no newline.
    scanned: usize,
}

impl<S: AsyncRead + Unpin> SlaveConnection<S> {
    /// Create a new slave connection.
    pub fn new(stream: S, idle_timeout: Duration, max_line_bytes: usize) -> Self {
        Self {
            stream,
            idle_timeout,
            max_line_bytes,
            read_buffer: Vec::with_capacity(READ_CHUNK),
            scanned: 0,
        }
    }

    /// Bytes buffered but not yet terminated by a newline.
    pub fn pending_bytes(&self) -> usize {
        self.read_buffer.len()
    }

    /// Read the next line, without its terminator (lossy UTF-8).
    ///
    /// Returns `Ok(None)` when the peer closes; an unterminated tail is
    /// discarded. Fails if no byte arrives within the idle timeout or a line
    /// grows past `max_line_bytes`.
    pub async fn read_line(&mut self) -> Result<Option<String>, ConnectionError> {
        loop {
            let newline = self.read_buffer[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| self.scanned + i);
            if let Some(pos) = newline {
                self.scanned = 0;
                if pos > self.max_line_bytes {
                    return Err(ConnectionError::LineTooLong {
                        len: pos,
                        max: self.max_line_bytes,
                    });
                }
                let line: Vec<u8> = self.read_buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line[..pos]).into_owned();
                return Ok(Some(text));
            }

            self.scanned = self.read_buffer.len();
            if self.read_buffer.len() > self.max_line_bytes {
                return Err(ConnectionError::LineTooLong {
                    len: self.read_buffer.len(),
                    max: self.max_line_bytes,
                });
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = tokio::time::timeout(self.idle_timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|_| ConnectionError::IdleTimeout(self.idle_timeout))??;

            if n == 0 {
                return Ok(None);
            }
            self.read_buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No data for {0:?}")]
    IdleTimeout(Duration),

    #[error("Line too long: {len} > {max} bytes")]
    LineTooLong { len: usize, max: usize },
}
