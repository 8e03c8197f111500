// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host VFS collaborator boundary
//!
//! The bridge never owns vnodes, poll machinery or the node-monitoring
//! service; it drives them through this trait. The host supplies an
//! implementation at endpoint construction, and the request dispatcher
//! calls into it while servicing inbound requests from the remote server.
//!
//! All vnode lifecycle hooks must be idempotent with respect to duplicate
//! delivery: get/put are reference-count operations, unremove reverses a
//! prior remove, and the removed query is a pure read.

use std::sync::Arc;

use crate::error::BridgeResult;
use crate::types::{ChangeEvent, NodeId, NodeWatchFlags, SelectSyncHandle, VolumeId, WatchToken};

/// Receives host-side change notifications for one watched node.
pub trait NodeEventSink: Send + Sync {
    fn node_event(&self, event: &ChangeEvent);
}

/// Operations the host environment provides to the bridge.
#[cfg_attr(test, mockall::automock)]
pub trait HostVnodeOps: Send + Sync {
    /// Acquire a reference to a node, instantiating it if needed.
    fn get_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()>;

    /// Drop a reference previously acquired with `get_vnode`.
    fn put_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()>;

    /// Announce a node that is not yet published to the host.
    fn new_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()>;

    /// Publish a node so the host can hand out references to it.
    fn publish_vnode(
        &self,
        volume: VolumeId,
        node: NodeId,
        node_type: u32,
        flags: u32,
    ) -> BridgeResult<()>;

    /// Mark a node for removal once its last reference drops.
    fn remove_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()>;

    /// Reverse a prior `remove_vnode`.
    fn unremove_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()>;

    /// Whether a node is currently marked removed.
    fn get_vnode_removed(&self, volume: VolumeId, node: NodeId) -> BridgeResult<bool>;

    /// Feed a remote change notification into the host's own notification
    /// machinery.
    fn notify_listener(&self, event: &ChangeEvent) -> BridgeResult<()>;

    /// Deliver a select/poll event for a validated sync handle.
    fn notify_select_event(&self, sync: SelectSyncHandle, event: u32) -> BridgeResult<()>;

    /// Deliver a live-query update addressed to a listener token.
    fn notify_query(&self, token: u64, event: &ChangeEvent) -> BridgeResult<()>;

    /// Subscribe `sink` to change notifications for a node. The returned
    /// token identifies the subscription to the host.
    fn add_node_watch(
        &self,
        device: VolumeId,
        node: NodeId,
        flags: NodeWatchFlags,
        sink: Arc<dyn NodeEventSink>,
    ) -> BridgeResult<WatchToken>;

    /// Replace the flag set of an existing subscription.
    fn update_node_watch(&self, token: WatchToken, flags: NodeWatchFlags) -> BridgeResult<()>;

    /// Drop a subscription.
    fn remove_node_watch(&self, token: WatchToken) -> BridgeResult<()>;
}
