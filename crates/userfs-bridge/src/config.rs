// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bridge configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables fixed at endpoint construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Number of pooled request ports, which bounds the number of
    /// concurrent outstanding calls.
    pub port_count: usize,
    /// Shared buffer capacity per port; larger frames fail with a length
    /// error rather than being split.
    pub max_message_size: usize,
    /// Per-wait timeout of the notification thread. Bounds how long
    /// endpoint teardown waits for the thread to notice the terminating
    /// flag.
    pub notification_timeout_ms: u64,
    /// How long the connect handshake waits for the server's reply.
    pub handshake_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port_count: 4,
            max_message_size: 64 * 1024,
            notification_timeout_ms: 500,
            handshake_timeout_ms: 5_000,
        }
    }
}

impl BridgeConfig {
    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
