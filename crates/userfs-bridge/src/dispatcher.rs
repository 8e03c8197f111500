// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reentrant request dispatch while waiting for replies
//!
//! The protocol allows the server to issue requests of its own on a port
//! whose client is blocked waiting for a reply. `KernelRequestHandler`
//! owns that wait: it services every inbound server request on the
//! caller's thread and returns only when the expected reply arrives.
//! The notification thread runs the same handler with no expected reply,
//! where any reply kind is a stray and is discarded.
//!
//! Every inbound request is answered, even when it cannot be serviced: an
//! unknown volume, listener key or select-sync handle earns a `BadValue`
//! status so the server never blocks on a reply that will not come.

use tracing::{debug, warn};
use userfs_proto::messages::{GetVNodeRemovedReply, StatusReply};
use userfs_proto::{Message, MessageKind};

use crate::error::{result_status, status, BridgeError, BridgeResult};
use crate::file_system::FileSystem;
use crate::port::RequestPort;
use crate::types::{
    ChangeEvent, NodeId, NodeWatchFlags, SelectSyncHandle, VolumeCapabilities, VolumeId,
};

pub struct KernelRequestHandler<'a> {
    file_system: &'a FileSystem,
    expected_reply: Option<MessageKind>,
}

impl<'a> KernelRequestHandler<'a> {
    /// Handler for one outstanding request/reply exchange.
    pub fn new(file_system: &'a FileSystem, expected_reply: MessageKind) -> Self {
        Self {
            file_system,
            expected_reply: Some(expected_reply),
        }
    }

    /// Handler for the notification port, which never awaits a reply.
    pub fn for_notifications(file_system: &'a FileSystem) -> Self {
        Self {
            file_system,
            expected_reply: None,
        }
    }

    /// Block until the expected reply arrives, servicing interleaved
    /// server requests on the calling thread.
    pub fn wait_for_reply(&self, port: &RequestPort) -> BridgeResult<Message> {
        loop {
            let message = match port.receive(None) {
                Ok(message) => message,
                // An unsolicited malformed frame is skipped; while a reply
                // is awaited it may be the reply itself, so the wait ends.
                Err(BridgeError::BadData) if self.expected_reply.is_none() => continue,
                Err(err) => return Err(err),
            };
            let kind = message.kind();
            if self.expected_reply == Some(kind) {
                return Ok(message);
            }
            if kind.is_reply() {
                if self.expected_reply.is_some() {
                    warn!(?kind, "reply of unexpected type, aborting wait");
                    return Err(BridgeError::BadData);
                }
                debug!(?kind, "discarding stray reply");
                continue;
            }
            self.handle_request(port, message)?;
        }
    }

    /// Service one inbound server request and send its reply. Only
    /// transport failures propagate; handler outcomes travel back as
    /// reply statuses.
    pub(crate) fn handle_request(&self, port: &RequestPort, message: Message) -> BridgeResult<()> {
        let host = self.file_system.host();
        match message {
            Message::GetVNode(req) => {
                let result = self
                    .volume_scoped(req.volume, |id| host.get_vnode(id, NodeId(req.node)));
                self.send_status(port, MessageKind::GetVNodeReply, &result)
            }
            Message::PutVNode(req) => {
                let result = self
                    .volume_scoped(req.volume, |id| host.put_vnode(id, NodeId(req.node)));
                self.send_status(port, MessageKind::PutVNodeReply, &result)
            }
            Message::NewVNode(req) => {
                let result =
                    self.announce_scoped(req.volume, NodeId(req.node), req.capabilities, |id| {
                        host.new_vnode(id, NodeId(req.node))
                    });
                self.send_status(port, MessageKind::NewVNodeReply, &result)
            }
            Message::PublishVNode(req) => {
                let result =
                    self.announce_scoped(req.volume, NodeId(req.node), req.capabilities, |id| {
                        host.publish_vnode(id, NodeId(req.node), req.node_type, req.flags)
                    });
                self.send_status(port, MessageKind::PublishVNodeReply, &result)
            }
            Message::RemoveVNode(req) => {
                let result = self
                    .volume_scoped(req.volume, |id| host.remove_vnode(id, NodeId(req.node)));
                self.send_status(port, MessageKind::RemoveVNodeReply, &result)
            }
            Message::UnremoveVNode(req) => {
                let result = self
                    .volume_scoped(req.volume, |id| host.unremove_vnode(id, NodeId(req.node)));
                self.send_status(port, MessageKind::UnremoveVNodeReply, &result)
            }
            Message::GetVNodeRemoved(req) => {
                let result = match self.file_system.get_volume(VolumeId(req.volume)) {
                    Some(volume) => host.get_vnode_removed(volume.id(), NodeId(req.node)),
                    None => Err(BridgeError::BadValue),
                };
                let (status, removed) = match result {
                    Ok(removed) => (status::OK, removed),
                    Err(err) => (err.to_status(), false),
                };
                port.send(&Message::GetVNodeRemovedReply(GetVNodeRemovedReply {
                    status,
                    removed,
                }))
            }
            Message::NotifyListener(req) => {
                let result = self.volume_scoped(req.volume, |id| {
                    host.notify_listener(&ChangeEvent {
                        op: req.op,
                        volume: id,
                        node: NodeId(req.node),
                        old_dir: NodeId(req.old_dir),
                        new_dir: NodeId(req.new_dir),
                        old_name: req.old_name.clone(),
                        name: req.name.clone(),
                    })
                });
                self.send_status(port, MessageKind::NotifyListenerReply, &result)
            }
            Message::NotifySelectEvent(req) => {
                let sync = SelectSyncHandle(req.sync);
                // A handle the endpoint no longer tracks is a late or
                // duplicate forward and must not reach the host.
                let result = if self.file_system.knows_select_sync(sync) {
                    host.notify_select_event(sync, req.event)
                } else {
                    Err(BridgeError::BadValue)
                };
                self.send_status(port, MessageKind::NotifySelectEventReply, &result)
            }
            Message::NotifyQuery(req) => {
                let result = self.volume_scoped(req.volume, |id| {
                    let event = ChangeEvent::simple(
                        req.op,
                        id,
                        NodeId(req.dir),
                        NodeId(req.node),
                        &req.name,
                    );
                    host.notify_query(req.token, &event)
                });
                self.send_status(port, MessageKind::NotifyQueryReply, &result)
            }
            Message::AddNodeListener(req) => {
                let result = self.file_system.add_node_listener(
                    req.listener,
                    VolumeId(req.device),
                    NodeId(req.node),
                    NodeWatchFlags::from_bits_truncate(req.flags),
                );
                self.send_status(port, MessageKind::AddNodeListenerReply, &result)
            }
            Message::RemoveNodeListener(req) => {
                let result = self.file_system.remove_node_listener(
                    req.listener,
                    VolumeId(req.device),
                    NodeId(req.node),
                );
                self.send_status(port, MessageKind::RemoveNodeListenerReply, &result)
            }
            other => {
                warn!(kind = ?other.kind(), "discarding request the bridge does not serve");
                Ok(())
            }
        }
    }

    /// Intern the announced node's dispatch table, then run the host call.
    /// If the host refuses, the table goes back so the node is not left
    /// dangling in the volume.
    fn announce_scoped<F>(
        &self,
        volume: u64,
        node: NodeId,
        capabilities: u64,
        f: F,
    ) -> BridgeResult<()>
    where
        F: FnOnce(VolumeId) -> BridgeResult<()>,
    {
        let Some(volume) = self.file_system.get_volume(VolumeId(volume)) else {
            return Err(BridgeError::BadValue);
        };
        volume.announce_vnode(node, VolumeCapabilities::from_bits_truncate(capabilities))?;
        let result = f(volume.id());
        if result.is_err() {
            volume.forget_node(node);
        }
        result
    }

    fn volume_scoped<F>(&self, volume: u64, f: F) -> BridgeResult<()>
    where
        F: FnOnce(VolumeId) -> BridgeResult<()>,
    {
        match self.file_system.get_volume(VolumeId(volume)) {
            Some(volume) => f(volume.id()),
            None => Err(BridgeError::BadValue),
        }
    }

    fn send_status(
        &self,
        port: &RequestPort,
        kind: MessageKind,
        result: &BridgeResult<()>,
    ) -> BridgeResult<()> {
        let reply = StatusReply {
            status: result_status(result),
        };
        let message = match kind {
            MessageKind::GetVNodeReply => Message::GetVNodeReply(reply),
            MessageKind::PutVNodeReply => Message::PutVNodeReply(reply),
            MessageKind::NewVNodeReply => Message::NewVNodeReply(reply),
            MessageKind::PublishVNodeReply => Message::PublishVNodeReply(reply),
            MessageKind::RemoveVNodeReply => Message::RemoveVNodeReply(reply),
            MessageKind::UnremoveVNodeReply => Message::UnremoveVNodeReply(reply),
            MessageKind::NotifyListenerReply => Message::NotifyListenerReply(reply),
            MessageKind::NotifySelectEventReply => Message::NotifySelectEventReply(reply),
            MessageKind::NotifyQueryReply => Message::NotifyQueryReply(reply),
            MessageKind::AddNodeListenerReply => Message::AddNodeListenerReply(reply),
            MessageKind::RemoveNodeListenerReply => Message::RemoveNodeListenerReply(reply),
            other => {
                warn!(kind = ?other, "no status reply for this kind");
                return Err(BridgeError::BadValue);
            }
        };
        port.send(&message)
    }
}
