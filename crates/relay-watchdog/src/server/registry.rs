// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static registry of known slaves and the relay wired to each.

use crate::config::SlaveRecord;
use std::collections::HashMap;
use std::net::IpAddr;

/// Immutable slave -> relay map, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct SlaveRegistry {
    /// Records in configuration order
    slaves: Vec<SlaveRecord>,

    /// Index: slave address -> position in `slaves`
    by_ip: HashMap<IpAddr, usize>,
}

impl SlaveRegistry {
    /// Build the registry. Later duplicates of an address are ignored.
    pub fn new(records: impl IntoIterator<Item = SlaveRecord>) -> Self {
        let mut slaves = Vec::new();
        let mut by_ip = HashMap::new();

        for record in records {
            if by_ip.contains_key(&record.slave_ip) {
                continue;
            }
            by_ip.insert(record.slave_ip, slaves.len());
            slaves.push(record);
        }

        Self { slaves, by_ip }
    }

    /// Relay wired to `ip`, if the slave is known.
    pub fn relay_for(&self, ip: &IpAddr) -> Option<&str> {
        self.by_ip
            .get(ip)
            .map(|&idx| self.slaves[idx].relay.as_str())
    }

    pub fn is_known(&self, ip: &IpAddr) -> bool {
        self.by_ip.contains_key(ip)
    }

    /// All known slaves.
    pub fn slaves(&self) -> impl Iterator<Item = &SlaveRecord> {
        self.slaves.iter()
    }

    /// Distinct relay ids, in configuration order.
    pub fn relays(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.slaves.len());
        for slave in &self.slaves {
            if !out.contains(&slave.relay.as_str()) {
                out.push(slave.relay.as_str());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }
}
