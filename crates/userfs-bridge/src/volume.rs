// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-mount volume state and remote operations
//!
//! A `Volume` owns everything the endpoint knows about one mount: its id,
//! the root node, the capability set the server reported for it, and the
//! dispatch tables of its instantiated nodes. Every operation is one
//! request/reply round trip on a pooled port; while the caller blocks for
//! the reply, inbound server requests are serviced on the same thread, so
//! a callback that issues a nested operation reuses the caller's port.
//!
//! Unmount removes the volume from the endpoint even when the remote
//! unmount fails; a dead server must never pin a mount.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tracing::{debug, warn};
use userfs_proto::messages::{
    AttrStat, Caller, CookieRequest, CreateAttrRequest, CreateDirRequest, CreateIndexRequest,
    CreateRequest, DirEntry, EntryRequest, FsInfo, IndexNameRequest, IoctlRequest, MountRequest,
    NodeRequest, OpenAttrRequest, OpenQueryRequest, OpenRequest, ReadDirRequest, ReadRequest,
    ReadVolumeDirRequest, RemoveAttrRequest, RenameAttrRequest, VNodeRequest, VolumeCookieRequest,
    VolumeRequest, WriteAttrStatRequest, WriteFsInfoRequest, WriteRequest,
};
use userfs_proto::{Message, MessageKind};

use crate::error::{check_status, BridgeError, BridgeResult};
use crate::file_system::FileSystem;
use crate::ops::VnodeOps;
use crate::types::{NodeId, VolumeCapabilities, VolumeId};

/// Extracts the expected reply payload. `send_receive` already matched the
/// kind, so a different variant here is a framing bug, answered as bad data.
macro_rules! expect_reply {
    ($volume:expr, $request:expr, $reply:ident) => {
        match $volume.send_receive($request, MessageKind::$reply)? {
            Message::$reply(reply) => reply,
            _ => return Err(BridgeError::BadData),
        }
    };
}

pub struct Volume {
    file_system: Weak<FileSystem>,
    id: VolumeId,
    root_id: OnceLock<NodeId>,
    capabilities: OnceLock<VolumeCapabilities>,
    // Dispatch table handed out for the volume's own nodes at mount time.
    ops: OnceLock<Arc<VnodeOps>>,
    // Tables of nodes instantiated through read_vnode, returned to the
    // cache when the node is written back or removed.
    nodes: Mutex<HashMap<NodeId, Arc<VnodeOps>>>,
    unmounted: AtomicBool,
}

impl Volume {
    pub(crate) fn new(file_system: &Arc<FileSystem>, id: VolumeId) -> Arc<Volume> {
        Arc::new(Volume {
            file_system: Arc::downgrade(file_system),
            id,
            root_id: OnceLock::new(),
            capabilities: OnceLock::new(),
            ops: OnceLock::new(),
            nodes: Mutex::new(HashMap::new()),
            unmounted: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> VolumeId {
        self.id
    }

    /// Root node id; set once the mount handshake completes.
    pub fn root_id(&self) -> Option<NodeId> {
        self.root_id.get().copied()
    }

    pub fn capabilities(&self) -> Option<VolumeCapabilities> {
        self.capabilities.get().copied()
    }

    /// The volume-level dispatch table (root node and volume operations).
    pub fn ops(&self) -> Option<Arc<VnodeOps>> {
        self.ops.get().cloned()
    }

    fn file_system(&self) -> BridgeResult<Arc<FileSystem>> {
        self.file_system.upgrade().ok_or(BridgeError::NotReady)
    }

    fn send_receive(&self, request: Message, expected: MessageKind) -> BridgeResult<Message> {
        self.file_system()?.send_receive(request, expected)
    }

    /// One round trip whose reply carries nothing but a status.
    fn status_call(&self, request: Message, expected: MessageKind) -> BridgeResult<()> {
        let reply = self.send_receive(request, expected)?;
        match reply.reply_status() {
            Some(status) => check_status(status),
            None => Err(BridgeError::BadData),
        }
    }

    // Lifecycle

    /// Mount handshake. Stamps the calling identity into the request so the
    /// server can apply permission checks on its side.
    pub(crate) fn mount(
        &self,
        device: &[u8],
        flags: u32,
        parameters: &[u8],
    ) -> BridgeResult<NodeId> {
        let fs = self.file_system()?;
        let reply = expect_reply!(
            self,
            Message::Mount(MountRequest {
                volume: self.id.0,
                device: device.to_vec(),
                flags,
                parameters: parameters.to_vec(),
                caller: current_caller(),
            }),
            MountReply
        );
        check_status(reply.status)?;

        let capabilities = VolumeCapabilities::from_bits_truncate(reply.capabilities);
        let root = NodeId(reply.root_id);
        let _ = self.root_id.set(root);
        let _ = self.capabilities.set(capabilities);
        let _ = self.ops.set(fs.ops_cache().get(capabilities));
        debug!(volume = %self.id, root = %root, "volume mounted");
        Ok(root)
    }

    /// Unmount. The remote result is reported but never keeps the volume
    /// alive: the endpoint forgets the mount either way.
    pub fn unmount(&self) -> BridgeResult<()> {
        if self.unmounted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let fs = self.file_system()?;
        let result = self.status_call(
            Message::Unmount(VolumeRequest { volume: self.id.0 }),
            MessageKind::UnmountReply,
        );
        if let Err(err) = &result {
            warn!(volume = %self.id, error = %err, "remote unmount failed, removing volume anyway");
        }

        let drained: Vec<_> = {
            let mut nodes = self.nodes.lock().unwrap();
            nodes.drain().map(|(_, ops)| ops).collect()
        };
        for ops in &drained {
            fs.ops_cache().put(ops);
        }
        if let Some(ops) = self.ops.get() {
            fs.ops_cache().put(ops);
        }
        fs.volume_unmounted(self.id);
        result
    }

    pub fn sync(&self) -> BridgeResult<()> {
        self.status_call(
            Message::SyncVolume(VolumeRequest { volume: self.id.0 }),
            MessageKind::SyncVolumeReply,
        )
    }

    pub fn read_fs_info(&self) -> BridgeResult<FsInfo> {
        let reply = expect_reply!(
            self,
            Message::ReadFsInfo(VolumeRequest { volume: self.id.0 }),
            ReadFsInfoReply
        );
        check_status(reply.status)?;
        Ok(reply.info)
    }

    pub fn write_fs_info(&self, info: &FsInfo, mask: u32) -> BridgeResult<()> {
        self.status_call(
            Message::WriteFsInfo(WriteFsInfoRequest {
                volume: self.id.0,
                info: info.clone(),
                mask,
            }),
            MessageKind::WriteFsInfoReply,
        )
    }

    // Vnodes

    /// Resolve a name in a directory.
    ///
    /// After the server connection dies, "." still resolves to the
    /// directory itself (with a reference taken through the host), so the
    /// root remains reachable and the volume can be unmounted.
    pub fn lookup(&self, dir: NodeId, name: &[u8]) -> BridgeResult<NodeId> {
        let fs = self.file_system()?;
        if fs.pool().is_disconnected() {
            if name == b"." {
                fs.host().get_vnode(self.id, dir)?;
                return Ok(dir);
            }
            return Err(BridgeError::NotReady);
        }
        let reply = expect_reply!(
            self,
            Message::Lookup(EntryRequest {
                volume: self.id.0,
                dir: dir.0,
                name: name.to_vec(),
            }),
            LookupReply
        );
        check_status(reply.status)?;
        Ok(NodeId(reply.node))
    }

    pub fn get_vnode_name(&self, node: NodeId) -> BridgeResult<Vec<u8>> {
        let reply = expect_reply!(
            self,
            Message::GetVNodeName(NodeRequest {
                volume: self.id.0,
                node: node.0,
            }),
            GetVNodeNameReply
        );
        check_status(reply.status)?;
        Ok(reply.name)
    }

    /// Instantiate a node and intern its dispatch table.
    pub fn read_vnode(&self, node: NodeId, reenter: bool) -> BridgeResult<Arc<VnodeOps>> {
        let fs = self.file_system()?;
        let reply = expect_reply!(
            self,
            Message::ReadVNode(VNodeRequest {
                volume: self.id.0,
                node: node.0,
                reenter,
            }),
            ReadVNodeReply
        );
        check_status(reply.status)?;

        let capabilities = VolumeCapabilities::from_bits_truncate(reply.capabilities);
        let ops = fs.ops_cache().get(capabilities);
        let previous = self.nodes.lock().unwrap().insert(node, Arc::clone(&ops));
        if let Some(previous) = previous {
            warn!(volume = %self.id, node = %node, "node instantiated twice");
            fs.ops_cache().put(&previous);
        }
        Ok(ops)
    }

    /// Write a node back and drop its dispatch table. The table is returned
    /// to the cache regardless of the remote result.
    pub fn write_vnode(&self, node: NodeId, reenter: bool) -> BridgeResult<()> {
        let result = self.status_call(
            Message::WriteVNode(VNodeRequest {
                volume: self.id.0,
                node: node.0,
                reenter,
            }),
            MessageKind::WriteVNodeReply,
        );
        self.forget_node(node);
        result
    }

    /// Remove a node marked for deletion, dropping its dispatch table.
    pub fn fs_remove_vnode(&self, node: NodeId, reenter: bool) -> BridgeResult<()> {
        let result = self.status_call(
            Message::FsRemoveVNode(VNodeRequest {
                volume: self.id.0,
                node: node.0,
                reenter,
            }),
            MessageKind::FsRemoveVNodeReply,
        );
        self.forget_node(node);
        result
    }

    /// Intern the dispatch table for a node the server announced through a
    /// new-vnode or publish-vnode callback.
    pub(crate) fn announce_vnode(
        &self,
        node: NodeId,
        capabilities: VolumeCapabilities,
    ) -> BridgeResult<()> {
        let fs = self.file_system()?;
        let ops = fs.ops_cache().get(capabilities);
        let previous = self.nodes.lock().unwrap().insert(node, ops);
        if let Some(previous) = previous {
            warn!(volume = %self.id, node = %node, "node announced twice");
            fs.ops_cache().put(&previous);
        }
        Ok(())
    }

    pub(crate) fn forget_node(&self, node: NodeId) {
        let removed = self.nodes.lock().unwrap().remove(&node);
        if let (Some(ops), Ok(fs)) = (removed, self.file_system()) {
            fs.ops_cache().put(&ops);
        }
    }

    /// Dispatch table interned for an instantiated node, if any.
    pub fn node_ops(&self, node: NodeId) -> Option<Arc<VnodeOps>> {
        self.nodes.lock().unwrap().get(&node).cloned()
    }

    // Files

    pub fn ioctl(
        &self,
        node: NodeId,
        cookie: u64,
        op: u32,
        buffer: &[u8],
        write_back: bool,
    ) -> BridgeResult<Vec<u8>> {
        let reply = expect_reply!(
            self,
            Message::Ioctl(IoctlRequest {
                volume: self.id.0,
                node: node.0,
                cookie,
                op,
                buffer: buffer.to_vec(),
                write_back,
            }),
            IoctlReply
        );
        check_status(reply.status)?;
        Ok(reply.buffer)
    }

    pub fn create(
        &self,
        dir: NodeId,
        name: &[u8],
        open_mode: u32,
        perms: u32,
    ) -> BridgeResult<(NodeId, u64)> {
        let reply = expect_reply!(
            self,
            Message::Create(CreateRequest {
                volume: self.id.0,
                dir: dir.0,
                name: name.to_vec(),
                open_mode,
                perms,
            }),
            CreateReply
        );
        check_status(reply.status)?;
        Ok((NodeId(reply.node), reply.cookie))
    }

    pub fn open(&self, node: NodeId, open_mode: u32) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::Open(OpenRequest {
                volume: self.id.0,
                node: node.0,
                open_mode,
            }),
            OpenReply
        );
        check_status(reply.status)?;
        Ok(reply.cookie)
    }

    pub fn close(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::Close(self.cookie_request(node, cookie)),
            MessageKind::CloseReply,
        )
    }

    pub fn free_cookie(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::FreeCookie(self.cookie_request(node, cookie)),
            MessageKind::FreeCookieReply,
        )
    }

    pub fn read(&self, node: NodeId, cookie: u64, pos: u64, size: u64) -> BridgeResult<Vec<u8>> {
        let reply = expect_reply!(
            self,
            Message::Read(ReadRequest {
                volume: self.id.0,
                node: node.0,
                cookie,
                pos,
                size,
            }),
            ReadReply
        );
        check_status(reply.status)?;
        Ok(reply.data)
    }

    pub fn write(&self, node: NodeId, cookie: u64, pos: u64, data: &[u8]) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::Write(WriteRequest {
                volume: self.id.0,
                node: node.0,
                cookie,
                pos,
                data: data.to_vec(),
            }),
            WriteReply
        );
        check_status(reply.status)?;
        Ok(reply.size)
    }

    // Directories

    pub fn create_dir(&self, dir: NodeId, name: &[u8], perms: u32) -> BridgeResult<()> {
        self.status_call(
            Message::CreateDir(CreateDirRequest {
                volume: self.id.0,
                dir: dir.0,
                name: name.to_vec(),
                perms,
            }),
            MessageKind::CreateDirReply,
        )
    }

    pub fn remove_dir(&self, dir: NodeId, name: &[u8]) -> BridgeResult<()> {
        self.status_call(
            Message::RemoveDir(EntryRequest {
                volume: self.id.0,
                dir: dir.0,
                name: name.to_vec(),
            }),
            MessageKind::RemoveDirReply,
        )
    }

    pub fn open_dir(&self, node: NodeId) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::OpenDir(NodeRequest {
                volume: self.id.0,
                node: node.0,
            }),
            OpenDirReply
        );
        check_status(reply.status)?;
        Ok(reply.cookie)
    }

    pub fn close_dir(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::CloseDir(self.cookie_request(node, cookie)),
            MessageKind::CloseDirReply,
        )
    }

    pub fn free_dir_cookie(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::FreeDirCookie(self.cookie_request(node, cookie)),
            MessageKind::FreeDirCookieReply,
        )
    }

    pub fn read_dir(&self, node: NodeId, cookie: u64, count: u32) -> BridgeResult<Vec<DirEntry>> {
        let reply = expect_reply!(
            self,
            Message::ReadDir(ReadDirRequest {
                volume: self.id.0,
                node: node.0,
                cookie,
                count,
            }),
            ReadDirReply
        );
        check_status(reply.status)?;
        Ok(reply.entries)
    }

    pub fn rewind_dir(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::RewindDir(self.cookie_request(node, cookie)),
            MessageKind::RewindDirReply,
        )
    }

    // Attribute directories

    pub fn open_attr_dir(&self, node: NodeId) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::OpenAttrDir(NodeRequest {
                volume: self.id.0,
                node: node.0,
            }),
            OpenAttrDirReply
        );
        check_status(reply.status)?;
        Ok(reply.cookie)
    }

    pub fn close_attr_dir(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::CloseAttrDir(self.cookie_request(node, cookie)),
            MessageKind::CloseAttrDirReply,
        )
    }

    pub fn free_attr_dir_cookie(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::FreeAttrDirCookie(self.cookie_request(node, cookie)),
            MessageKind::FreeAttrDirCookieReply,
        )
    }

    pub fn read_attr_dir(
        &self,
        node: NodeId,
        cookie: u64,
        count: u32,
    ) -> BridgeResult<Vec<DirEntry>> {
        let reply = expect_reply!(
            self,
            Message::ReadAttrDir(ReadDirRequest {
                volume: self.id.0,
                node: node.0,
                cookie,
                count,
            }),
            ReadAttrDirReply
        );
        check_status(reply.status)?;
        Ok(reply.entries)
    }

    pub fn rewind_attr_dir(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::RewindAttrDir(self.cookie_request(node, cookie)),
            MessageKind::RewindAttrDirReply,
        )
    }

    // Attributes

    pub fn create_attr(
        &self,
        node: NodeId,
        name: &[u8],
        type_code: u32,
        open_mode: u32,
    ) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::CreateAttr(CreateAttrRequest {
                volume: self.id.0,
                node: node.0,
                name: name.to_vec(),
                type_code,
                open_mode,
            }),
            CreateAttrReply
        );
        check_status(reply.status)?;
        Ok(reply.cookie)
    }

    pub fn open_attr(&self, node: NodeId, name: &[u8], open_mode: u32) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::OpenAttr(OpenAttrRequest {
                volume: self.id.0,
                node: node.0,
                name: name.to_vec(),
                open_mode,
            }),
            OpenAttrReply
        );
        check_status(reply.status)?;
        Ok(reply.cookie)
    }

    pub fn close_attr(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::CloseAttr(self.cookie_request(node, cookie)),
            MessageKind::CloseAttrReply,
        )
    }

    pub fn free_attr_cookie(&self, node: NodeId, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::FreeAttrCookie(self.cookie_request(node, cookie)),
            MessageKind::FreeAttrCookieReply,
        )
    }

    pub fn read_attr(
        &self,
        node: NodeId,
        cookie: u64,
        pos: u64,
        size: u64,
    ) -> BridgeResult<Vec<u8>> {
        let reply = expect_reply!(
            self,
            Message::ReadAttr(ReadRequest {
                volume: self.id.0,
                node: node.0,
                cookie,
                pos,
                size,
            }),
            ReadAttrReply
        );
        check_status(reply.status)?;
        Ok(reply.data)
    }

    pub fn write_attr(
        &self,
        node: NodeId,
        cookie: u64,
        pos: u64,
        data: &[u8],
    ) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::WriteAttr(WriteRequest {
                volume: self.id.0,
                node: node.0,
                cookie,
                pos,
                data: data.to_vec(),
            }),
            WriteAttrReply
        );
        check_status(reply.status)?;
        Ok(reply.size)
    }

    pub fn read_attr_stat(&self, node: NodeId, cookie: u64) -> BridgeResult<AttrStat> {
        let reply = expect_reply!(
            self,
            Message::ReadAttrStat(self.cookie_request(node, cookie)),
            ReadAttrStatReply
        );
        check_status(reply.status)?;
        Ok(reply.stat)
    }

    pub fn write_attr_stat(
        &self,
        node: NodeId,
        cookie: u64,
        stat: &AttrStat,
        mask: u32,
    ) -> BridgeResult<()> {
        self.status_call(
            Message::WriteAttrStat(WriteAttrStatRequest {
                volume: self.id.0,
                node: node.0,
                cookie,
                stat: stat.clone(),
                mask,
            }),
            MessageKind::WriteAttrStatReply,
        )
    }

    pub fn rename_attr(
        &self,
        from_node: NodeId,
        from_name: &[u8],
        to_node: NodeId,
        to_name: &[u8],
    ) -> BridgeResult<()> {
        self.status_call(
            Message::RenameAttr(RenameAttrRequest {
                volume: self.id.0,
                from_node: from_node.0,
                from_name: from_name.to_vec(),
                to_node: to_node.0,
                to_name: to_name.to_vec(),
            }),
            MessageKind::RenameAttrReply,
        )
    }

    pub fn remove_attr(&self, node: NodeId, name: &[u8]) -> BridgeResult<()> {
        self.status_call(
            Message::RemoveAttr(RemoveAttrRequest {
                volume: self.id.0,
                node: node.0,
                name: name.to_vec(),
            }),
            MessageKind::RemoveAttrReply,
        )
    }

    // Indices

    pub fn open_index_dir(&self) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::OpenIndexDir(VolumeRequest { volume: self.id.0 }),
            OpenIndexDirReply
        );
        check_status(reply.status)?;
        Ok(reply.cookie)
    }

    pub fn close_index_dir(&self, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::CloseIndexDir(self.volume_cookie_request(cookie)),
            MessageKind::CloseIndexDirReply,
        )
    }

    pub fn free_index_dir_cookie(&self, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::FreeIndexDirCookie(self.volume_cookie_request(cookie)),
            MessageKind::FreeIndexDirCookieReply,
        )
    }

    pub fn read_index_dir(&self, cookie: u64, count: u32) -> BridgeResult<Vec<DirEntry>> {
        let reply = expect_reply!(
            self,
            Message::ReadIndexDir(ReadVolumeDirRequest {
                volume: self.id.0,
                cookie,
                count,
            }),
            ReadIndexDirReply
        );
        check_status(reply.status)?;
        Ok(reply.entries)
    }

    pub fn rewind_index_dir(&self, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::RewindIndexDir(self.volume_cookie_request(cookie)),
            MessageKind::RewindIndexDirReply,
        )
    }

    pub fn create_index(&self, name: &[u8], type_code: u32, flags: u32) -> BridgeResult<()> {
        self.status_call(
            Message::CreateIndex(CreateIndexRequest {
                volume: self.id.0,
                name: name.to_vec(),
                type_code,
                flags,
            }),
            MessageKind::CreateIndexReply,
        )
    }

    pub fn remove_index(&self, name: &[u8]) -> BridgeResult<()> {
        self.status_call(
            Message::RemoveIndex(IndexNameRequest {
                volume: self.id.0,
                name: name.to_vec(),
            }),
            MessageKind::RemoveIndexReply,
        )
    }

    pub fn read_index_stat(&self, name: &[u8]) -> BridgeResult<AttrStat> {
        let reply = expect_reply!(
            self,
            Message::ReadIndexStat(IndexNameRequest {
                volume: self.id.0,
                name: name.to_vec(),
            }),
            ReadIndexStatReply
        );
        check_status(reply.status)?;
        Ok(reply.stat)
    }

    // Queries

    pub fn open_query(&self, query: &[u8], flags: u32, token: u64) -> BridgeResult<u64> {
        let reply = expect_reply!(
            self,
            Message::OpenQuery(OpenQueryRequest {
                volume: self.id.0,
                query: query.to_vec(),
                flags,
                token,
            }),
            OpenQueryReply
        );
        check_status(reply.status)?;
        Ok(reply.cookie)
    }

    pub fn close_query(&self, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::CloseQuery(self.volume_cookie_request(cookie)),
            MessageKind::CloseQueryReply,
        )
    }

    pub fn free_query_cookie(&self, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::FreeQueryCookie(self.volume_cookie_request(cookie)),
            MessageKind::FreeQueryCookieReply,
        )
    }

    pub fn read_query(&self, cookie: u64, count: u32) -> BridgeResult<Vec<DirEntry>> {
        let reply = expect_reply!(
            self,
            Message::ReadQuery(ReadVolumeDirRequest {
                volume: self.id.0,
                cookie,
                count,
            }),
            ReadQueryReply
        );
        check_status(reply.status)?;
        Ok(reply.entries)
    }

    pub fn rewind_query(&self, cookie: u64) -> BridgeResult<()> {
        self.status_call(
            Message::RewindQuery(self.volume_cookie_request(cookie)),
            MessageKind::RewindQueryReply,
        )
    }

    fn cookie_request(&self, node: NodeId, cookie: u64) -> CookieRequest {
        CookieRequest {
            volume: self.id.0,
            node: node.0,
            cookie,
        }
    }

    fn volume_cookie_request(&self, cookie: u64) -> VolumeCookieRequest {
        VolumeCookieRequest {
            volume: self.id.0,
            cookie,
        }
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("root_id", &self.root_id.get())
            .field("unmounted", &self.unmounted.load(Ordering::SeqCst))
            .finish()
    }
}

fn current_caller() -> Caller {
    // Effective ids, matching what permission checks on the server side
    // should see.
    Caller {
        pid: std::process::id(),
        uid: unsafe { libc::geteuid() },
        gid: unsafe { libc::getegid() },
    }
}
