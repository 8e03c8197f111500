// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the UserFS bridge

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Opaque mount identifier, assigned by the endpoint at mount time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeId(pub u64);

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vol:{}", self.0)
    }
}

/// Opaque node identifier within one volume. Remote and host exchange these
/// instead of raw pointers; an id the endpoint does not know is rejected,
/// never dereferenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Opaque poll/select synchronization handle, reference counted by the
/// endpoint so late or duplicate select-event forwards can be validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectSyncHandle(pub u64);

/// Host-assigned handle for one node-watch subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchToken(pub u64);

/// Key identifying one node-listener subscription: the same remote listener
/// may watch many nodes, and many listeners may watch the same node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    pub listener: u64,
    pub device: VolumeId,
    pub node: NodeId,
}

bitflags! {
    /// One bit per optional operation, negotiated at connect time for the
    /// filesystem and fixed per volume at mount time.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct VolumeCapabilities: u64 {
        const SYNC                  = 1 << 0;
        const READ_FS_INFO          = 1 << 1;
        const WRITE_FS_INFO         = 1 << 2;
        const LOOKUP                = 1 << 3;
        const GET_VNODE_NAME        = 1 << 4;
        const WRITE_VNODE           = 1 << 5;
        const REMOVE_VNODE          = 1 << 6;
        const IOCTL                 = 1 << 7;
        const CREATE                = 1 << 8;
        const OPEN                  = 1 << 9;
        const CLOSE                 = 1 << 10;
        const FREE_COOKIE           = 1 << 11;
        const READ                  = 1 << 12;
        const WRITE                 = 1 << 13;
        const CREATE_DIR            = 1 << 14;
        const REMOVE_DIR            = 1 << 15;
        const OPEN_DIR              = 1 << 16;
        const CLOSE_DIR             = 1 << 17;
        const FREE_DIR_COOKIE       = 1 << 18;
        const READ_DIR              = 1 << 19;
        const REWIND_DIR            = 1 << 20;
        const OPEN_ATTR_DIR         = 1 << 21;
        const CLOSE_ATTR_DIR        = 1 << 22;
        const FREE_ATTR_DIR_COOKIE  = 1 << 23;
        const READ_ATTR_DIR         = 1 << 24;
        const REWIND_ATTR_DIR       = 1 << 25;
        const CREATE_ATTR           = 1 << 26;
        const OPEN_ATTR             = 1 << 27;
        const CLOSE_ATTR            = 1 << 28;
        const FREE_ATTR_COOKIE      = 1 << 29;
        const READ_ATTR             = 1 << 30;
        const WRITE_ATTR            = 1 << 31;
        const READ_ATTR_STAT        = 1 << 32;
        const WRITE_ATTR_STAT       = 1 << 33;
        const RENAME_ATTR           = 1 << 34;
        const REMOVE_ATTR           = 1 << 35;
        const OPEN_INDEX_DIR        = 1 << 36;
        const CLOSE_INDEX_DIR       = 1 << 37;
        const FREE_INDEX_DIR_COOKIE = 1 << 38;
        const READ_INDEX_DIR        = 1 << 39;
        const REWIND_INDEX_DIR      = 1 << 40;
        const CREATE_INDEX          = 1 << 41;
        const REMOVE_INDEX          = 1 << 42;
        const READ_INDEX_STAT       = 1 << 43;
        const OPEN_QUERY            = 1 << 44;
        const CLOSE_QUERY           = 1 << 45;
        const FREE_QUERY_COOKIE     = 1 << 46;
        const READ_QUERY            = 1 << 47;
        const REWIND_QUERY          = 1 << 48;
    }
}

bitflags! {
    /// What a node listener wants to hear about.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct NodeWatchFlags: u32 {
        const WATCH_NAME      = 1 << 0;
        const WATCH_STAT      = 1 << 1;
        const WATCH_ATTR      = 1 << 2;
        const WATCH_DIRECTORY = 1 << 3;
    }
}

/// Change-notification operations carried by listener and query forwards.
pub mod notify_op {
    pub const ENTRY_CREATED: u32 = 1;
    pub const ENTRY_REMOVED: u32 = 2;
    pub const ENTRY_MOVED: u32 = 3;
    pub const STAT_CHANGED: u32 = 4;
    pub const ATTR_CHANGED: u32 = 5;
}

/// One host-side change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub op: u32,
    pub volume: VolumeId,
    pub node: NodeId,
    pub old_dir: NodeId,
    pub new_dir: NodeId,
    pub old_name: Vec<u8>,
    pub name: Vec<u8>,
}

impl ChangeEvent {
    /// A plain single-entry event (created/removed/stat/attr).
    pub fn simple(op: u32, volume: VolumeId, dir: NodeId, node: NodeId, name: &[u8]) -> Self {
        Self {
            op,
            volume,
            node,
            old_dir: dir,
            new_dir: dir,
            old_name: Vec::new(),
            name: name.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_bits_are_distinct() {
        assert_eq!(VolumeCapabilities::all().bits().count_ones(), 49);
        assert!(VolumeCapabilities::from_bits(u64::MAX).is_none());
    }

    #[test]
    fn test_listener_key_identity() {
        let a = ListenerKey {
            listener: 1,
            device: VolumeId(2),
            node: NodeId(3),
        };
        let b = ListenerKey {
            listener: 1,
            device: VolumeId(2),
            node: NodeId(3),
        };
        assert_eq!(a, b);
        let c = ListenerKey {
            listener: 1,
            device: VolumeId(2),
            node: NodeId(4),
        };
        assert_ne!(a, c);
    }
}
