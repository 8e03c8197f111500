// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Node listener proxies
//!
//! A remote filesystem can watch host-side nodes. Each subscription is
//! keyed by (listener, device, node) and backed by one proxy that stands
//! in the host's node-monitoring service and forwards every event to the
//! server as a `NodeMonitoringEvent` round trip.
//!
//! Registration is idempotent: repeating a subscription with the same
//! flags is a no-op, new flags are OR'd into the existing subscription.
//! Event forwarding is at-most-once; an event that cannot be delivered is
//! logged and dropped, never queued.

use std::sync::{Arc, Mutex, Weak};

use tracing::warn;
use userfs_proto::messages::NodeMonitoringEventRequest;
use userfs_proto::{Message, MessageKind};

use crate::error::{check_status, BridgeError, BridgeResult};
use crate::file_system::FileSystem;
use crate::host::NodeEventSink;
use crate::types::{ChangeEvent, ListenerKey, NodeWatchFlags, WatchToken};

struct ProxyState {
    flags: NodeWatchFlags,
    token: Option<WatchToken>,
}

pub struct NodeListenerProxy {
    key: ListenerKey,
    file_system: Weak<FileSystem>,
    state: Mutex<ProxyState>,
}

impl NodeListenerProxy {
    pub(crate) fn new(key: ListenerKey, file_system: Weak<FileSystem>) -> Arc<Self> {
        Arc::new(Self {
            key,
            file_system,
            state: Mutex::new(ProxyState {
                flags: NodeWatchFlags::empty(),
                token: None,
            }),
        })
    }

    pub fn key(&self) -> ListenerKey {
        self.key
    }

    fn file_system(&self) -> BridgeResult<Arc<FileSystem>> {
        self.file_system.upgrade().ok_or(BridgeError::NotReady)
    }

    /// Subscribe, or widen an existing subscription. Repeating the current
    /// flag set does nothing.
    pub(crate) fn start_listening(self: &Arc<Self>, flags: NodeWatchFlags) -> BridgeResult<()> {
        let fs = self.file_system()?;
        let mut state = self.state.lock().unwrap();
        match state.token {
            Some(token) => {
                let combined = state.flags | flags;
                if combined == state.flags {
                    return Ok(());
                }
                fs.host().update_node_watch(token, combined)?;
                state.flags = combined;
                Ok(())
            }
            None => {
                let sink: Arc<dyn NodeEventSink> = Arc::clone(self) as Arc<dyn NodeEventSink>;
                let token =
                    fs.host()
                        .add_node_watch(self.key.device, self.key.node, flags, sink)?;
                state.token = Some(token);
                state.flags = flags;
                Ok(())
            }
        }
    }

    /// Drop the host subscription. Safe to call on a proxy that never
    /// subscribed.
    pub(crate) fn stop_listening(&self) -> BridgeResult<()> {
        let fs = self.file_system()?;
        let token = self.state.lock().unwrap().token.take();
        match token {
            Some(token) => fs.host().remove_node_watch(token),
            None => Ok(()),
        }
    }

    pub(crate) fn is_inactive(&self) -> bool {
        self.state.lock().unwrap().token.is_none()
    }
}

impl NodeEventSink for NodeListenerProxy {
    fn node_event(&self, event: &ChangeEvent) {
        let Some(fs) = self.file_system.upgrade() else {
            return;
        };
        if let Err(err) = forward_event(&fs, self.key.listener, event) {
            warn!(
                listener = self.key.listener,
                node = %self.key.node,
                error = %err,
                "dropping undeliverable node monitoring event"
            );
        }
    }
}

fn forward_event(fs: &FileSystem, listener: u64, event: &ChangeEvent) -> BridgeResult<()> {
    let reply = fs.send_receive(
        Message::NodeMonitoringEvent(NodeMonitoringEventRequest {
            listener,
            op: event.op,
            device: event.volume.0,
            node: event.node.0,
            name: event.name.clone(),
        }),
        MessageKind::NodeMonitoringEventReply,
    )?;
    match reply.reply_status() {
        Some(status) => check_status(status),
        None => Err(BridgeError::BadData),
    }
}
