// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Connection endpoint for one remote filesystem
//!
//! A `FileSystem` owns everything shared by the mounts of one remote
//! filesystem: the request port pool, the dispatch-table cache, the
//! select-sync registry, the node listener proxies and the notification
//! thread. It is created by `connect`, which performs the handshake on the
//! first port, and torn down by `Drop`, which works with a dead server as
//! well as a live one.
//!
//! The notification thread holds only a weak reference and wakes at a
//! bounded interval, so dropping the last strong reference is enough to
//! terminate it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use userfs_proto::messages::{ConnectRequest, DisconnectRequest};
use userfs_proto::{validate_message, Message, MessageKind};

use crate::config::BridgeConfig;
use crate::dispatcher::KernelRequestHandler;
use crate::error::{check_status, BridgeError, BridgeResult};
use crate::host::HostVnodeOps;
use crate::listener::NodeListenerProxy;
use crate::ops::VnodeOpsCache;
use crate::pool::{PortReleaser, RequestPortPool};
use crate::port::RequestPort;
use crate::types::{ListenerKey, NodeId, NodeWatchFlags, SelectSyncHandle, VolumeCapabilities, VolumeId};
use crate::volume::Volume;

/// Endpoint lifecycle. `Terminating` is entered by `Drop` and visible to
/// the notification thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointState {
    Connecting,
    Operating,
    Terminating,
}

pub struct FileSystem {
    self_ref: Weak<FileSystem>,
    name: String,
    config: BridgeConfig,
    host: Arc<dyn HostVnodeOps>,
    pool: RequestPortPool,
    ops_cache: VnodeOpsCache,
    notification_port: Arc<RequestPort>,
    server_pid: u32,
    capabilities: VolumeCapabilities,
    volumes: Mutex<HashMap<VolumeId, Arc<Volume>>>,
    next_volume_id: AtomicU64,
    // Select-sync handles are reference counted; a forward for a handle
    // with no references is late and gets rejected.
    select_syncs: Mutex<HashMap<SelectSyncHandle, u32>>,
    listeners: Mutex<HashMap<ListenerKey, Arc<NodeListenerProxy>>>,
    state: Mutex<EndpointState>,
    terminating: AtomicBool,
    notification_thread: Mutex<Option<JoinHandle<()>>>,
}

impl FileSystem {
    /// Connect to a remote filesystem server over a prepared set of ports.
    ///
    /// The handshake runs on the first port with a bounded wait. The server
    /// answers with its capability set and how many ports it is willing to
    /// serve; surplus ports are closed instead of pooled.
    pub fn connect(
        name: &str,
        host: Arc<dyn HostVnodeOps>,
        config: BridgeConfig,
        mut ports: Vec<RequestPort>,
        notification_port: RequestPort,
    ) -> BridgeResult<Arc<FileSystem>> {
        let Some(first) = ports.first() else {
            return Err(BridgeError::BadValue);
        };
        first.send(&Message::Connect(ConnectRequest {
            fs_name: name.as_bytes().to_vec(),
        }))?;
        let reply = match first.receive(Some(config.handshake_timeout()))? {
            Message::ConnectReply(reply) => reply,
            other => {
                warn!(kind = ?other.kind(), "handshake answered with wrong message");
                return Err(BridgeError::BadData);
            }
        };
        check_status(reply.status)?;
        if reply.port_count == 0 {
            warn!("server offered no request ports");
            return Err(BridgeError::BadData);
        }

        let capabilities = VolumeCapabilities::from_bits_truncate(reply.capabilities);
        let fs = Arc::new_cyclic(|weak| FileSystem {
            self_ref: weak.clone(),
            name: name.to_string(),
            config: config.clone(),
            host,
            pool: RequestPortPool::new(),
            ops_cache: VnodeOpsCache::new(),
            notification_port: Arc::new(notification_port),
            server_pid: reply.server_pid,
            capabilities,
            volumes: Mutex::new(HashMap::new()),
            next_volume_id: AtomicU64::new(1),
            select_syncs: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            state: Mutex::new(EndpointState::Connecting),
            terminating: AtomicBool::new(false),
            notification_thread: Mutex::new(None),
        });

        let usable = ports.len().min(reply.port_count as usize);
        for port in ports.drain(..usable) {
            fs.pool.add(port);
        }
        for surplus in ports {
            surplus.close();
        }

        let weak = Arc::downgrade(&fs);
        let timeout = config.notification_timeout();
        let handle = thread::Builder::new()
            .name(format!("userfs-notify-{name}"))
            .spawn(move || notification_loop(weak, timeout))
            .map_err(|err| {
                warn!(error = %err, "failed to spawn notification thread");
                BridgeError::NoMemory
            })?;
        *fs.notification_thread.lock().unwrap() = Some(handle);
        *fs.state.lock().unwrap() = EndpointState::Operating;

        info!(
            name,
            server_pid = reply.server_pid,
            ports = usable,
            "connected to filesystem server"
        );
        Ok(fs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Capability set negotiated at connect time.
    pub fn capabilities(&self) -> VolumeCapabilities {
        self.capabilities
    }

    pub fn server_pid(&self) -> u32 {
        self.server_pid
    }

    pub fn state(&self) -> EndpointState {
        *self.state.lock().unwrap()
    }

    pub fn host(&self) -> &Arc<dyn HostVnodeOps> {
        &self.host
    }

    pub fn pool(&self) -> &RequestPortPool {
        &self.pool
    }

    pub(crate) fn ops_cache(&self) -> &VnodeOpsCache {
        &self.ops_cache
    }

    // Volumes

    /// Mount a volume. The volume is registered before the remote mount is
    /// sent so callbacks issued during mounting can already address it; a
    /// failed mount unregisters it again.
    pub fn mount(
        self: &Arc<Self>,
        device: &[u8],
        flags: u32,
        parameters: &[u8],
    ) -> BridgeResult<Arc<Volume>> {
        let id = VolumeId(self.next_volume_id.fetch_add(1, Ordering::SeqCst));
        let volume = Volume::new(self, id);
        self.volumes.lock().unwrap().insert(id, Arc::clone(&volume));
        match volume.mount(device, flags, parameters) {
            Ok(_) => Ok(volume),
            Err(err) => {
                self.volumes.lock().unwrap().remove(&id);
                Err(err)
            }
        }
    }

    pub fn get_volume(&self, id: VolumeId) -> Option<Arc<Volume>> {
        self.volumes.lock().unwrap().get(&id).cloned()
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.lock().unwrap().len()
    }

    pub(crate) fn volume_unmounted(&self, id: VolumeId) {
        if self.volumes.lock().unwrap().remove(&id).is_some() {
            debug!(volume = %id, "volume removed from endpoint");
        }
    }

    // Select syncs

    /// Track a select-sync handle so the server's event forwards for it
    /// pass validation. Reference counted per handle.
    pub fn register_select_sync(&self, sync: SelectSyncHandle) {
        *self.select_syncs.lock().unwrap().entry(sync).or_insert(0) += 1;
    }

    pub fn unregister_select_sync(&self, sync: SelectSyncHandle) -> BridgeResult<()> {
        let mut syncs = self.select_syncs.lock().unwrap();
        let Some(count) = syncs.get_mut(&sync) else {
            return Err(BridgeError::BadValue);
        };
        *count -= 1;
        if *count == 0 {
            syncs.remove(&sync);
        }
        Ok(())
    }

    pub fn knows_select_sync(&self, sync: SelectSyncHandle) -> bool {
        self.select_syncs.lock().unwrap().contains_key(&sync)
    }

    // Node listeners

    pub(crate) fn add_node_listener(
        &self,
        listener: u64,
        device: VolumeId,
        node: NodeId,
        flags: NodeWatchFlags,
    ) -> BridgeResult<()> {
        let key = ListenerKey {
            listener,
            device,
            node,
        };
        let proxy = {
            let mut listeners = self.listeners.lock().unwrap();
            Arc::clone(listeners.entry(key).or_insert_with(|| {
                NodeListenerProxy::new(key, self.self_ref.clone())
            }))
        };
        let result = proxy.start_listening(flags);
        if result.is_err() {
            // Do not keep a proxy that never subscribed.
            let mut listeners = self.listeners.lock().unwrap();
            if listeners.get(&key).is_some_and(|p| p.is_inactive()) {
                listeners.remove(&key);
            }
        }
        result
    }

    pub(crate) fn remove_node_listener(
        &self,
        listener: u64,
        device: VolumeId,
        node: NodeId,
    ) -> BridgeResult<()> {
        let key = ListenerKey {
            listener,
            device,
            node,
        };
        let Some(proxy) = self.listeners.lock().unwrap().remove(&key) else {
            return Err(BridgeError::BadValue);
        };
        proxy.stop_listening()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    // Transport

    /// One request/reply round trip on a pooled port. While blocked for
    /// the reply, inbound server requests run on this thread.
    pub(crate) fn send_receive(
        &self,
        request: Message,
        expected: MessageKind,
    ) -> BridgeResult<Message> {
        if let Err(err) = validate_message(&request) {
            warn!(error = %err, "refusing invalid request");
            return Err(BridgeError::BadValue);
        }
        let port = self.pool.acquire()?;
        let guard = PortReleaser::new(&self.pool, port);
        guard.port().send(&request)?;
        KernelRequestHandler::new(self, expected).wait_for_reply(guard.port())
    }

    // Test support

    #[cfg(test)]
    pub(crate) fn detached(host: Arc<dyn HostVnodeOps>, config: BridgeConfig) -> Arc<FileSystem> {
        let (port, peer) = RequestPort::pair(config.max_message_size)
            .expect("socketpair for detached endpoint");
        peer.close();
        Arc::new_cyclic(|weak| FileSystem {
            self_ref: weak.clone(),
            name: "detached".to_string(),
            config,
            host,
            pool: RequestPortPool::new(),
            ops_cache: VnodeOpsCache::new(),
            notification_port: Arc::new(port),
            server_pid: 0,
            capabilities: VolumeCapabilities::all(),
            volumes: Mutex::new(HashMap::new()),
            next_volume_id: AtomicU64::new(1),
            select_syncs: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            state: Mutex::new(EndpointState::Operating),
            terminating: AtomicBool::new(false),
            notification_thread: Mutex::new(None),
        })
    }

    #[cfg(test)]
    pub(crate) fn insert_volume(&self, volume: Arc<Volume>) {
        self.volumes.lock().unwrap().insert(volume.id(), volume);
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        *self.state.get_mut().unwrap() = EndpointState::Terminating;
        self.terminating.store(true, Ordering::SeqCst);

        // Best-effort farewell so an attentive server can clean up early.
        let _ = self.notification_port.send(&Message::Disconnect(DisconnectRequest {
            reason: 0,
        }));
        self.pool.disconnect();

        if let Some(handle) = self.notification_thread.get_mut().unwrap().take() {
            if handle.thread().id() == thread::current().id() {
                // The last strong reference died on the notification thread
                // itself; it is already unwinding its loop.
            } else {
                let _ = handle.join();
            }
        }

        // Drain what the thread left behind, then tear the queues down.
        while self
            .notification_port
            .receive(Some(Duration::from_millis(1)))
            .is_ok()
        {}
        self.notification_port.close();
        self.pool.close_free_ports();

        let volumes = self.volumes.get_mut().unwrap();
        if !volumes.is_empty() {
            warn!(
                name = %self.name,
                count = volumes.len(),
                "endpoint dropped with volumes still mounted"
            );
        }
    }
}

impl std::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystem")
            .field("name", &self.name)
            .field("server_pid", &self.server_pid)
            .field("state", &self.state())
            .field("volumes", &self.volume_count())
            .finish()
    }
}

fn notification_loop(fs: Weak<FileSystem>, timeout: Duration) {
    loop {
        // Holding the Arc only inside one iteration lets the endpoint die
        // while the thread sits in a bounded wait.
        let Some(fs) = fs.upgrade() else {
            break;
        };
        if fs.terminating.load(Ordering::SeqCst) {
            break;
        }
        let port = Arc::clone(&fs.notification_port);
        match port.receive(Some(timeout)) {
            Ok(message) => {
                let kind = message.kind();
                if kind.is_reply() {
                    debug!(?kind, "discarding stray reply on notification port");
                    continue;
                }
                let handler = KernelRequestHandler::for_notifications(&fs);
                if let Err(err) = handler.handle_request(&port, message) {
                    warn!(error = %err, "failed to answer notification request");
                }
            }
            Err(BridgeError::TimedOut) | Err(BridgeError::BadData) => {}
            Err(err) => {
                debug!(error = %err, "notification port closed, thread exiting");
                break;
            }
        }
    }
}
