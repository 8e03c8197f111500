// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-process test doubles: a scripted filesystem server and a recording
//! host.
//!
//! The scripted server runs one thread per request port. Every inbound
//! request first goes through the test's script; requests the script does
//! not claim are answered by `default_answer`, which says yes to
//! everything with fixed cookies and ids. The recording host implements
//! `HostVnodeOps` by logging each call and succeeding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use userfs_proto::messages::{
    AttrStat, ConnectReply, CookieReply, CreateReply, FsInfo, GetVNodeNameReply, IoctlReply,
    LookupReply, MountReply, ReadAttrStatReply, ReadDirReply, ReadFsInfoReply,
    ReadIndexStatReply, ReadReply, ReadVNodeReply, StatusReply, WriteReply,
};
use userfs_proto::{Message, STATUS_OK};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostVnodeOps, NodeEventSink};
use crate::port::RequestPort;
use crate::types::{
    ChangeEvent, NodeId, NodeWatchFlags, SelectSyncHandle, VolumeCapabilities, VolumeId,
    WatchToken,
};

/// Install a compact subscriber honoring `RUST_LOG`. Safe to call from
/// every test; repeated installs are ignored.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A script inspects one inbound request and may answer it itself. Return
/// `true` once answered; `false` falls through to `default_answer`.
pub type Script = dyn Fn(&Message, &RequestPort) -> bool + Send + Sync;

/// Script that defers everything to `default_answer`.
pub fn answer_everything() -> Arc<Script> {
    Arc::new(|_, _| false)
}

/// Client-side ports plus the running server serving their peers.
pub struct ServerHarness {
    pub ports: Vec<RequestPort>,
    pub notification_port: RequestPort,
    /// Server side of the notification channel, for injecting
    /// server-initiated requests into the bridge.
    pub server_notification_port: RequestPort,
    pub server: ScriptedServer,
}

pub struct ScriptedServer {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl ScriptedServer {
    /// Create socketpairs per the config and serve their remote halves.
    pub fn spawn(config: &BridgeConfig, script: Arc<Script>) -> std::io::Result<ServerHarness> {
        let stop = Arc::new(AtomicBool::new(false));
        let port_count = config.port_count as u32;
        let mut ports = Vec::with_capacity(config.port_count);
        let mut threads = Vec::with_capacity(config.port_count);
        for index in 0..config.port_count {
            let (client, server) = RequestPort::pair(config.max_message_size)?;
            ports.push(client);
            let script = Arc::clone(&script);
            let stop = Arc::clone(&stop);
            threads.push(
                thread::Builder::new()
                    .name(format!("scripted-server-{index}"))
                    .spawn(move || serve_port(server, script, port_count, stop))?,
            );
        }
        let (notification_port, server_notification_port) =
            RequestPort::pair(config.max_message_size)?;
        Ok(ServerHarness {
            ports,
            notification_port,
            server_notification_port,
            server: ScriptedServer { stop, threads },
        })
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn serve_port(port: RequestPort, script: Arc<Script>, port_count: u32, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match port.receive(Some(Duration::from_millis(50))) {
            Ok(Message::Disconnect(_)) => break,
            Ok(message) => {
                if !(script)(&message, &port) {
                    default_answer(&message, &port, port_count);
                }
            }
            Err(BridgeError::TimedOut) => {}
            Err(_) => break,
        }
    }
}

/// Answer any request affirmatively with fixed ids and cookies. Replies
/// and unknown kinds are ignored.
pub fn default_answer(message: &Message, port: &RequestPort, port_count: u32) {
    let all = VolumeCapabilities::all().bits();
    let ok = StatusReply::ok();
    let reply = match message {
        Message::Connect(_) => Message::ConnectReply(ConnectReply {
            status: STATUS_OK,
            capabilities: all,
            port_count,
            server_pid: std::process::id(),
        }),
        Message::Mount(_) => Message::MountReply(MountReply {
            status: STATUS_OK,
            root_id: 1,
            capabilities: all,
        }),
        Message::Unmount(_) => Message::UnmountReply(ok),
        Message::SyncVolume(_) => Message::SyncVolumeReply(ok),
        Message::ReadFsInfo(_) => Message::ReadFsInfoReply(ReadFsInfoReply {
            status: STATUS_OK,
            info: FsInfo {
                flags: 0,
                block_size: 4096,
                io_size: 65536,
                total_blocks: 1024,
                free_blocks: 512,
                total_nodes: 128,
                free_nodes: 64,
                volume_name: b"scripted".to_vec(),
            },
        }),
        Message::WriteFsInfo(_) => Message::WriteFsInfoReply(ok),
        Message::Lookup(req) => Message::LookupReply(LookupReply {
            status: STATUS_OK,
            node: req.dir + 1,
        }),
        Message::GetVNodeName(_) => Message::GetVNodeNameReply(GetVNodeNameReply {
            status: STATUS_OK,
            name: b"node".to_vec(),
        }),
        Message::ReadVNode(_) => Message::ReadVNodeReply(ReadVNodeReply {
            status: STATUS_OK,
            capabilities: all,
        }),
        Message::WriteVNode(_) => Message::WriteVNodeReply(ok),
        Message::FsRemoveVNode(_) => Message::FsRemoveVNodeReply(ok),
        Message::Ioctl(req) => Message::IoctlReply(IoctlReply {
            status: STATUS_OK,
            buffer: req.buffer.clone(),
        }),
        Message::Create(_) => Message::CreateReply(CreateReply {
            status: STATUS_OK,
            node: 100,
            cookie: 1,
        }),
        Message::Open(_) => Message::OpenReply(cookie_reply()),
        Message::Close(_) => Message::CloseReply(ok),
        Message::FreeCookie(_) => Message::FreeCookieReply(ok),
        Message::Read(req) => Message::ReadReply(ReadReply {
            status: STATUS_OK,
            data: vec![0u8; req.size as usize],
        }),
        Message::Write(req) => Message::WriteReply(WriteReply {
            status: STATUS_OK,
            size: req.data.len() as u64,
        }),
        Message::CreateDir(_) => Message::CreateDirReply(ok),
        Message::RemoveDir(_) => Message::RemoveDirReply(ok),
        Message::OpenDir(_) => Message::OpenDirReply(cookie_reply()),
        Message::CloseDir(_) => Message::CloseDirReply(ok),
        Message::FreeDirCookie(_) => Message::FreeDirCookieReply(ok),
        Message::ReadDir(_) => Message::ReadDirReply(empty_dir()),
        Message::RewindDir(_) => Message::RewindDirReply(ok),
        Message::OpenAttrDir(_) => Message::OpenAttrDirReply(cookie_reply()),
        Message::CloseAttrDir(_) => Message::CloseAttrDirReply(ok),
        Message::FreeAttrDirCookie(_) => Message::FreeAttrDirCookieReply(ok),
        Message::ReadAttrDir(_) => Message::ReadAttrDirReply(empty_dir()),
        Message::RewindAttrDir(_) => Message::RewindAttrDirReply(ok),
        Message::CreateAttr(_) => Message::CreateAttrReply(cookie_reply()),
        Message::OpenAttr(_) => Message::OpenAttrReply(cookie_reply()),
        Message::CloseAttr(_) => Message::CloseAttrReply(ok),
        Message::FreeAttrCookie(_) => Message::FreeAttrCookieReply(ok),
        Message::ReadAttr(req) => Message::ReadAttrReply(ReadReply {
            status: STATUS_OK,
            data: vec![0u8; req.size as usize],
        }),
        Message::WriteAttr(req) => Message::WriteAttrReply(WriteReply {
            status: STATUS_OK,
            size: req.data.len() as u64,
        }),
        Message::ReadAttrStat(_) => Message::ReadAttrStatReply(ReadAttrStatReply {
            status: STATUS_OK,
            stat: zero_stat(),
        }),
        Message::WriteAttrStat(_) => Message::WriteAttrStatReply(ok),
        Message::RenameAttr(_) => Message::RenameAttrReply(ok),
        Message::RemoveAttr(_) => Message::RemoveAttrReply(ok),
        Message::OpenIndexDir(_) => Message::OpenIndexDirReply(cookie_reply()),
        Message::CloseIndexDir(_) => Message::CloseIndexDirReply(ok),
        Message::FreeIndexDirCookie(_) => Message::FreeIndexDirCookieReply(ok),
        Message::ReadIndexDir(_) => Message::ReadIndexDirReply(empty_dir()),
        Message::RewindIndexDir(_) => Message::RewindIndexDirReply(ok),
        Message::CreateIndex(_) => Message::CreateIndexReply(ok),
        Message::RemoveIndex(_) => Message::RemoveIndexReply(ok),
        Message::ReadIndexStat(_) => Message::ReadIndexStatReply(ReadIndexStatReply {
            status: STATUS_OK,
            stat: zero_stat(),
        }),
        Message::OpenQuery(_) => Message::OpenQueryReply(cookie_reply()),
        Message::CloseQuery(_) => Message::CloseQueryReply(ok),
        Message::FreeQueryCookie(_) => Message::FreeQueryCookieReply(ok),
        Message::ReadQuery(_) => Message::ReadQueryReply(empty_dir()),
        Message::RewindQuery(_) => Message::RewindQueryReply(ok),
        Message::NodeMonitoringEvent(_) => Message::NodeMonitoringEventReply(ok),
        _ => return,
    };
    let _ = port.send(&reply);
}

fn cookie_reply() -> CookieReply {
    CookieReply {
        status: STATUS_OK,
        cookie: 1,
    }
}

fn empty_dir() -> ReadDirReply {
    ReadDirReply {
        status: STATUS_OK,
        entries: Vec::new(),
    }
}

fn zero_stat() -> AttrStat {
    AttrStat {
        type_code: 0,
        size: 0,
    }
}

struct WatchEntry {
    device: VolumeId,
    node: NodeId,
    flags: NodeWatchFlags,
    sink: Arc<dyn NodeEventSink>,
}

/// Host double that records every call and succeeds.
#[derive(Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<String>>,
    watches: Mutex<HashMap<u64, WatchEntry>>,
    next_token: AtomicU64,
    listener_events: Mutex<Vec<ChangeEvent>>,
    select_events: Mutex<Vec<(SelectSyncHandle, u32)>>,
    query_events: Mutex<Vec<(u64, ChangeEvent)>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn listener_events(&self) -> Vec<ChangeEvent> {
        self.listener_events.lock().unwrap().clone()
    }

    pub fn select_events(&self) -> Vec<(SelectSyncHandle, u32)> {
        self.select_events.lock().unwrap().clone()
    }

    pub fn query_events(&self) -> Vec<(u64, ChangeEvent)> {
        self.query_events.lock().unwrap().clone()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().unwrap().len()
    }

    pub fn watch_flags(&self, device: VolumeId, node: NodeId) -> Option<NodeWatchFlags> {
        self.watches
            .lock()
            .unwrap()
            .values()
            .find(|entry| entry.device == device && entry.node == node)
            .map(|entry| entry.flags)
    }

    /// The sink subscribed for a node, for driving events from a test.
    pub fn sink(&self, device: VolumeId, node: NodeId) -> Option<Arc<dyn NodeEventSink>> {
        self.watches
            .lock()
            .unwrap()
            .values()
            .find(|entry| entry.device == device && entry.node == node)
            .map(|entry| Arc::clone(&entry.sink))
    }
}

impl HostVnodeOps for RecordingHost {
    fn get_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()> {
        self.record(format!("get_vnode {volume} {node}"));
        Ok(())
    }

    fn put_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()> {
        self.record(format!("put_vnode {volume} {node}"));
        Ok(())
    }

    fn new_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()> {
        self.record(format!("new_vnode {volume} {node}"));
        Ok(())
    }

    fn publish_vnode(
        &self,
        volume: VolumeId,
        node: NodeId,
        node_type: u32,
        _flags: u32,
    ) -> BridgeResult<()> {
        self.record(format!("publish_vnode {volume} {node} {node_type:o}"));
        Ok(())
    }

    fn remove_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()> {
        self.record(format!("remove_vnode {volume} {node}"));
        Ok(())
    }

    fn unremove_vnode(&self, volume: VolumeId, node: NodeId) -> BridgeResult<()> {
        self.record(format!("unremove_vnode {volume} {node}"));
        Ok(())
    }

    fn get_vnode_removed(&self, volume: VolumeId, node: NodeId) -> BridgeResult<bool> {
        self.record(format!("get_vnode_removed {volume} {node}"));
        Ok(false)
    }

    fn notify_listener(&self, event: &ChangeEvent) -> BridgeResult<()> {
        self.listener_events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn notify_select_event(&self, sync: SelectSyncHandle, event: u32) -> BridgeResult<()> {
        self.select_events.lock().unwrap().push((sync, event));
        Ok(())
    }

    fn notify_query(&self, token: u64, event: &ChangeEvent) -> BridgeResult<()> {
        self.query_events.lock().unwrap().push((token, event.clone()));
        Ok(())
    }

    fn add_node_watch(
        &self,
        device: VolumeId,
        node: NodeId,
        flags: NodeWatchFlags,
        sink: Arc<dyn NodeEventSink>,
    ) -> BridgeResult<WatchToken> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        self.watches.lock().unwrap().insert(
            token,
            WatchEntry {
                device,
                node,
                flags,
                sink,
            },
        );
        Ok(WatchToken(token))
    }

    fn update_node_watch(&self, token: WatchToken, flags: NodeWatchFlags) -> BridgeResult<()> {
        let mut watches = self.watches.lock().unwrap();
        let Some(entry) = watches.get_mut(&token.0) else {
            return Err(BridgeError::BadValue);
        };
        entry.flags = flags;
        Ok(())
    }

    fn remove_node_watch(&self, token: WatchToken) -> BridgeResult<()> {
        if self.watches.lock().unwrap().remove(&token.0).is_none() {
            return Err(BridgeError::BadValue);
        }
        Ok(())
    }
}
