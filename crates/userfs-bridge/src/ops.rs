// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-capability vnode dispatch tables
//!
//! The host drives nodes through a `VnodeOps` object rather than through
//! the volume directly. Every method first checks the capability bit the
//! remote filesystem advertised; a missing bit answers `NotSupported`
//! locally, without a round trip. `read_vnode` is the one mandatory entry
//! and carries no bit.
//!
//! Tables are interned in a `VnodeOpsCache` keyed by the capability set,
//! so all nodes with the same capabilities share one table instance. The
//! cache counts references explicitly: `get` on an unseen set creates the
//! table, the last `put` destroys it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;
use userfs_proto::messages::{AttrStat, DirEntry, FsInfo};

use crate::error::{BridgeError, BridgeResult};
use crate::types::{NodeId, VolumeCapabilities};
use crate::volume::Volume;

pub struct VnodeOps {
    capabilities: VolumeCapabilities,
}

impl VnodeOps {
    fn new(capabilities: VolumeCapabilities) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> VolumeCapabilities {
        self.capabilities
    }

    pub fn supports(&self, capability: VolumeCapabilities) -> bool {
        self.capabilities.contains(capability)
    }

    fn check(&self, capability: VolumeCapabilities) -> BridgeResult<()> {
        if self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(BridgeError::NotSupported)
        }
    }

    /// Instantiate a node. Mandatory, so never capability-gated.
    pub fn read_vnode(
        &self,
        volume: &Volume,
        node: NodeId,
        reenter: bool,
    ) -> BridgeResult<Arc<VnodeOps>> {
        volume.read_vnode(node, reenter)
    }
}

macro_rules! vnode_ops {
    ($( $cap:ident => fn $name:ident( $($arg:ident : $ty:ty),* ) -> $ret:ty; )+) => {
        impl VnodeOps {
            $(
                pub fn $name(&self, volume: &Volume $(, $arg: $ty)*) -> BridgeResult<$ret> {
                    self.check(VolumeCapabilities::$cap)?;
                    volume.$name($($arg),*)
                }
            )+
        }
    };
}

vnode_ops! {
    SYNC => fn sync() -> ();
    READ_FS_INFO => fn read_fs_info() -> FsInfo;
    WRITE_FS_INFO => fn write_fs_info(info: &FsInfo, mask: u32) -> ();
    LOOKUP => fn lookup(dir: NodeId, name: &[u8]) -> NodeId;
    GET_VNODE_NAME => fn get_vnode_name(node: NodeId) -> Vec<u8>;
    WRITE_VNODE => fn write_vnode(node: NodeId, reenter: bool) -> ();
    REMOVE_VNODE => fn fs_remove_vnode(node: NodeId, reenter: bool) -> ();
    IOCTL => fn ioctl(node: NodeId, cookie: u64, op: u32, buffer: &[u8], write_back: bool) -> Vec<u8>;
    CREATE => fn create(dir: NodeId, name: &[u8], open_mode: u32, perms: u32) -> (NodeId, u64);
    OPEN => fn open(node: NodeId, open_mode: u32) -> u64;
    CLOSE => fn close(node: NodeId, cookie: u64) -> ();
    FREE_COOKIE => fn free_cookie(node: NodeId, cookie: u64) -> ();
    READ => fn read(node: NodeId, cookie: u64, pos: u64, size: u64) -> Vec<u8>;
    WRITE => fn write(node: NodeId, cookie: u64, pos: u64, data: &[u8]) -> u64;
    CREATE_DIR => fn create_dir(dir: NodeId, name: &[u8], perms: u32) -> ();
    REMOVE_DIR => fn remove_dir(dir: NodeId, name: &[u8]) -> ();
    OPEN_DIR => fn open_dir(node: NodeId) -> u64;
    CLOSE_DIR => fn close_dir(node: NodeId, cookie: u64) -> ();
    FREE_DIR_COOKIE => fn free_dir_cookie(node: NodeId, cookie: u64) -> ();
    READ_DIR => fn read_dir(node: NodeId, cookie: u64, count: u32) -> Vec<DirEntry>;
    REWIND_DIR => fn rewind_dir(node: NodeId, cookie: u64) -> ();
    OPEN_ATTR_DIR => fn open_attr_dir(node: NodeId) -> u64;
    CLOSE_ATTR_DIR => fn close_attr_dir(node: NodeId, cookie: u64) -> ();
    FREE_ATTR_DIR_COOKIE => fn free_attr_dir_cookie(node: NodeId, cookie: u64) -> ();
    READ_ATTR_DIR => fn read_attr_dir(node: NodeId, cookie: u64, count: u32) -> Vec<DirEntry>;
    REWIND_ATTR_DIR => fn rewind_attr_dir(node: NodeId, cookie: u64) -> ();
    CREATE_ATTR => fn create_attr(node: NodeId, name: &[u8], type_code: u32, open_mode: u32) -> u64;
    OPEN_ATTR => fn open_attr(node: NodeId, name: &[u8], open_mode: u32) -> u64;
    CLOSE_ATTR => fn close_attr(node: NodeId, cookie: u64) -> ();
    FREE_ATTR_COOKIE => fn free_attr_cookie(node: NodeId, cookie: u64) -> ();
    READ_ATTR => fn read_attr(node: NodeId, cookie: u64, pos: u64, size: u64) -> Vec<u8>;
    WRITE_ATTR => fn write_attr(node: NodeId, cookie: u64, pos: u64, data: &[u8]) -> u64;
    READ_ATTR_STAT => fn read_attr_stat(node: NodeId, cookie: u64) -> AttrStat;
    WRITE_ATTR_STAT => fn write_attr_stat(node: NodeId, cookie: u64, stat: &AttrStat, mask: u32) -> ();
    RENAME_ATTR => fn rename_attr(from_node: NodeId, from_name: &[u8], to_node: NodeId, to_name: &[u8]) -> ();
    REMOVE_ATTR => fn remove_attr(node: NodeId, name: &[u8]) -> ();
    OPEN_INDEX_DIR => fn open_index_dir() -> u64;
    CLOSE_INDEX_DIR => fn close_index_dir(cookie: u64) -> ();
    FREE_INDEX_DIR_COOKIE => fn free_index_dir_cookie(cookie: u64) -> ();
    READ_INDEX_DIR => fn read_index_dir(cookie: u64, count: u32) -> Vec<DirEntry>;
    REWIND_INDEX_DIR => fn rewind_index_dir(cookie: u64) -> ();
    CREATE_INDEX => fn create_index(name: &[u8], type_code: u32, flags: u32) -> ();
    REMOVE_INDEX => fn remove_index(name: &[u8]) -> ();
    READ_INDEX_STAT => fn read_index_stat(name: &[u8]) -> AttrStat;
    OPEN_QUERY => fn open_query(query: &[u8], flags: u32, token: u64) -> u64;
    CLOSE_QUERY => fn close_query(cookie: u64) -> ();
    FREE_QUERY_COOKIE => fn free_query_cookie(cookie: u64) -> ();
    READ_QUERY => fn read_query(cookie: u64, count: u32) -> Vec<DirEntry>;
    REWIND_QUERY => fn rewind_query(cookie: u64) -> ();
}

struct OpsEntry {
    ops: Arc<VnodeOps>,
    ref_count: usize,
}

/// Interns dispatch tables by capability set with explicit reference
/// counting.
pub struct VnodeOpsCache {
    entries: Mutex<HashMap<u64, OpsEntry>>,
}

impl VnodeOpsCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the table for a capability set, creating it on first use.
    pub fn get(&self, capabilities: VolumeCapabilities) -> Arc<VnodeOps> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .entry(capabilities.bits())
            .or_insert_with(|| OpsEntry {
                ops: Arc::new(VnodeOps::new(capabilities)),
                ref_count: 0,
            });
        entry.ref_count += 1;
        Arc::clone(&entry.ops)
    }

    /// Return a reference taken with `get`. The last put removes the table
    /// from the cache.
    pub fn put(&self, ops: &Arc<VnodeOps>) {
        let mut entries = self.entries.lock().unwrap();
        let key = ops.capabilities().bits();
        let Some(entry) = entries.get_mut(&key) else {
            warn!(capabilities = key, "put of uncached dispatch table");
            return;
        };
        if !Arc::ptr_eq(&entry.ops, ops) {
            warn!(capabilities = key, "put of a superseded dispatch table");
            return;
        }
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            entries.remove(&key);
        }
    }

    /// Number of distinct capability sets currently interned.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VnodeOpsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_capabilities_share_one_table() {
        let cache = VnodeOpsCache::new();
        let caps = VolumeCapabilities::READ | VolumeCapabilities::OPEN;

        let first = cache.get(caps);
        let second = cache.get(caps);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let other = cache.get(VolumeCapabilities::READ);
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_last_put_drops_the_table() {
        let cache = VnodeOpsCache::new();
        let caps = VolumeCapabilities::LOOKUP;

        let first = cache.get(caps);
        let second = cache.get(caps);
        cache.put(&first);
        assert_eq!(cache.len(), 1);
        cache.put(&second);
        assert!(cache.is_empty());

        // A fresh get after the table died makes a new instance.
        let third = cache.get(caps);
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_stale_put_is_ignored() {
        let cache = VnodeOpsCache::new();
        let caps = VolumeCapabilities::SYNC;

        let stale = cache.get(caps);
        cache.put(&stale);
        assert!(cache.is_empty());

        // The cache has cycled; the old reference must not disturb the new
        // entry's count.
        let fresh = cache.get(caps);
        cache.put(&stale);
        assert_eq!(cache.len(), 1);
        cache.put(&fresh);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_capability_is_rejected_locally() {
        let ops = VnodeOps::new(VolumeCapabilities::READ);
        assert!(ops.supports(VolumeCapabilities::READ));
        assert!(!ops.supports(VolumeCapabilities::WRITE));
        assert_eq!(
            ops.check(VolumeCapabilities::WRITE),
            Err(BridgeError::NotSupported)
        );
        assert_eq!(ops.check(VolumeCapabilities::READ), Ok(()));
    }
}
