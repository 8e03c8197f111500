// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Wire message catalogue for the UserFS bridge
//!
//! Every message is a `{kind, payload}` pair. The kind is a stable `u16`
//! code; the payload is an SSZ-encoded struct. Requests and replies share
//! one catalogue because both directions travel over the same ports and the
//! request dispatcher has to switch on whatever arrives, solicited or not.
//! Strings cross the wire as `Vec<u8>`; strictly speaking entry names are
//! byte strings, not UTF-8.

use serde::{Deserialize, Serialize};
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};

use crate::wire::WireError;

/// Wire status code for success. Non-zero codes are remote-defined and
/// passed through to the host caller unchanged.
pub const STATUS_OK: u32 = 0;

/// Identity of the host-side caller, stamped into mount requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Caller {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Reply carrying nothing but a status code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct StatusReply {
    pub status: u32,
}

impl StatusReply {
    pub fn ok() -> Self {
        Self { status: STATUS_OK }
    }
}

// Administrative messages

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ConnectRequest {
    pub fs_name: Vec<u8>,
}

/// Handshake reply: negotiated capability bits, how many ports the server
/// is willing to serve, and the server process identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ConnectReply {
    pub status: u32,
    pub capabilities: u64,
    pub port_count: u32,
    pub server_pid: u32,
}

/// Sent on endpoint teardown; the server does not reply. `reason` 0 means
/// orderly teardown.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct DisconnectRequest {
    pub reason: u32,
}

// Volume lifecycle

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct MountRequest {
    pub volume: u64,
    pub device: Vec<u8>,
    pub flags: u32,
    pub parameters: Vec<u8>,
    pub caller: Caller,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct MountReply {
    pub status: u32,
    pub root_id: u64,
    pub capabilities: u64,
}

/// Request addressed to a volume with no further arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct VolumeRequest {
    pub volume: u64,
}

/// Static information about a mounted volume.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct FsInfo {
    pub flags: u32,
    pub block_size: u64,
    pub io_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_nodes: u64,
    pub free_nodes: u64,
    pub volume_name: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadFsInfoReply {
    pub status: u32,
    pub info: FsInfo,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct WriteFsInfoRequest {
    pub volume: u64,
    pub info: FsInfo,
    pub mask: u32,
}

// Vnode operations

/// Request naming a directory entry: lookup, remove-dir and friends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct EntryRequest {
    pub volume: u64,
    pub dir: u64,
    pub name: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct LookupReply {
    pub status: u32,
    pub node: u64,
}

/// Request addressed to a single node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct NodeRequest {
    pub volume: u64,
    pub node: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct GetVNodeNameReply {
    pub status: u32,
    pub name: Vec<u8>,
}

/// Vnode lifecycle request; `reenter` is set when the call originates from
/// inside the filesystem itself and must not recurse into it again.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct VNodeRequest {
    pub volume: u64,
    pub node: u64,
    pub reenter: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadVNodeReply {
    pub status: u32,
    pub capabilities: u64,
}

// File operations

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct IoctlRequest {
    pub volume: u64,
    pub node: u64,
    pub cookie: u64,
    pub op: u32,
    pub buffer: Vec<u8>,
    pub write_back: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct IoctlReply {
    pub status: u32,
    pub buffer: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct CreateRequest {
    pub volume: u64,
    pub dir: u64,
    pub name: Vec<u8>,
    pub open_mode: u32,
    pub perms: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct CreateReply {
    pub status: u32,
    pub node: u64,
    pub cookie: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct OpenRequest {
    pub volume: u64,
    pub node: u64,
    pub open_mode: u32,
}

/// Reply handing out a remote-side cookie.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct CookieReply {
    pub status: u32,
    pub cookie: u64,
}

/// Request addressed to a node plus a previously handed-out cookie.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct CookieRequest {
    pub volume: u64,
    pub node: u64,
    pub cookie: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadRequest {
    pub volume: u64,
    pub node: u64,
    pub cookie: u64,
    pub pos: u64,
    pub size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadReply {
    pub status: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct WriteRequest {
    pub volume: u64,
    pub node: u64,
    pub cookie: u64,
    pub pos: u64,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct WriteReply {
    pub status: u32,
    pub size: u64,
}

// Directory operations

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct CreateDirRequest {
    pub volume: u64,
    pub dir: u64,
    pub name: Vec<u8>,
    pub perms: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadDirRequest {
    pub volume: u64,
    pub node: u64,
    pub cookie: u64,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct DirEntry {
    pub node: u64,
    pub name: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadDirReply {
    pub status: u32,
    pub entries: Vec<DirEntry>,
}

// Attribute operations

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct CreateAttrRequest {
    pub volume: u64,
    pub node: u64,
    pub name: Vec<u8>,
    pub type_code: u32,
    pub open_mode: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct OpenAttrRequest {
    pub volume: u64,
    pub node: u64,
    pub name: Vec<u8>,
    pub open_mode: u32,
}

/// Type and size of an attribute or index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct AttrStat {
    pub type_code: u32,
    pub size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadAttrStatReply {
    pub status: u32,
    pub stat: AttrStat,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct WriteAttrStatRequest {
    pub volume: u64,
    pub node: u64,
    pub cookie: u64,
    pub stat: AttrStat,
    pub mask: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct RenameAttrRequest {
    pub volume: u64,
    pub from_node: u64,
    pub from_name: Vec<u8>,
    pub to_node: u64,
    pub to_name: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct RemoveAttrRequest {
    pub volume: u64,
    pub node: u64,
    pub name: Vec<u8>,
}

// Index and query operations

/// Request addressed to a volume-level cookie (index dir, query).
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct VolumeCookieRequest {
    pub volume: u64,
    pub cookie: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadVolumeDirRequest {
    pub volume: u64,
    pub cookie: u64,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct CreateIndexRequest {
    pub volume: u64,
    pub name: Vec<u8>,
    pub type_code: u32,
    pub flags: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct IndexNameRequest {
    pub volume: u64,
    pub name: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ReadIndexStatReply {
    pub status: u32,
    pub stat: AttrStat,
}

/// Opens a live query; `token` identifies the listener that receives
/// `NotifyQuery` forwards for it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct OpenQueryRequest {
    pub volume: u64,
    pub query: Vec<u8>,
    pub flags: u32,
    pub token: u64,
}

// Host callbacks (remote server -> bridge)

/// Server announcement of a freshly created node. `capabilities` selects
/// the dispatch table the host interns for it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct NewVNodeRequest {
    pub volume: u64,
    pub node: u64,
    pub capabilities: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct PublishVNodeRequest {
    pub volume: u64,
    pub node: u64,
    pub capabilities: u64,
    pub node_type: u32,
    pub flags: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct GetVNodeRemovedReply {
    pub status: u32,
    pub removed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct AddNodeListenerRequest {
    pub listener: u64,
    pub device: u64,
    pub node: u64,
    pub flags: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct RemoveNodeListenerRequest {
    pub listener: u64,
    pub device: u64,
    pub node: u64,
}

// Notification forwards

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct NotifyListenerRequest {
    pub volume: u64,
    pub op: u32,
    pub node: u64,
    pub old_dir: u64,
    pub new_dir: u64,
    pub old_name: Vec<u8>,
    pub name: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct NotifySelectEventRequest {
    pub sync: u64,
    pub event: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct NotifyQueryRequest {
    pub token: u64,
    pub volume: u64,
    pub op: u32,
    pub dir: u64,
    pub node: u64,
    pub name: Vec<u8>,
}

/// Host-side change notification forwarded to a remote listener.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct NodeMonitoringEventRequest {
    pub listener: u64,
    pub op: u32,
    pub device: u64,
    pub node: u64,
    pub name: Vec<u8>,
}

macro_rules! message_catalogue {
    ($( $variant:ident($payload:ty) = $code:literal, )+) => {
        /// One wire message, request or reply.
        #[derive(Clone, Debug, PartialEq)]
        pub enum Message {
            $( $variant($payload), )+
        }

        /// Stable wire code of every message kind.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum MessageKind {
            $( $variant = $code, )+
        }

        impl MessageKind {
            pub fn from_code(code: u16) -> Option<MessageKind> {
                match code {
                    $( $code => Some(MessageKind::$variant), )+
                    _ => None,
                }
            }

            pub fn code(self) -> u16 {
                self as u16
            }
        }

        impl Message {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $( Message::$variant(_) => MessageKind::$variant, )+
                }
            }

            /// Encode as kind code plus SSZ payload (frame length excluded).
            pub fn encode(&self) -> Vec<u8> {
                match self {
                    $( Message::$variant(payload) => {
                        let mut bytes = Vec::with_capacity(2 + payload.ssz_bytes_len());
                        bytes.extend_from_slice(&($code as u16).to_le_bytes());
                        bytes.extend_from_slice(&payload.as_ssz_bytes());
                        bytes
                    } )+
                }
            }

            /// Decode a kind code plus SSZ payload.
            pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
                if bytes.len() < 2 {
                    return Err(WireError::Truncated);
                }
                let code = u16::from_le_bytes([bytes[0], bytes[1]]);
                let body = &bytes[2..];
                match MessageKind::from_code(code) {
                    $( Some(MessageKind::$variant) => {
                        let payload = <$payload>::from_ssz_bytes(body).map_err(|err| {
                            WireError::Payload {
                                kind: MessageKind::$variant,
                                detail: format!("{:?}", err),
                            }
                        })?;
                        Ok(Message::$variant(payload))
                    } )+
                    None => Err(WireError::UnknownKind(code)),
                }
            }

            /// One sample of every catalogue entry, for exhaustive wire
            /// tests.
            #[cfg(test)]
            pub(crate) fn catalogue_samples() -> Vec<Message> {
                vec![ $( Message::$variant(Default::default()), )+ ]
            }
        }
    };
}

// Kind codes are grouped the way the catalogue is grouped, with gaps left
// between the groups so new operations keep their neighbors.
message_catalogue! {
    // administrative
    Connect(ConnectRequest) = 0,
    ConnectReply(ConnectReply) = 1,
    Disconnect(DisconnectRequest) = 2,

    // volume lifecycle
    Mount(MountRequest) = 16,
    MountReply(MountReply) = 17,
    Unmount(VolumeRequest) = 18,
    UnmountReply(StatusReply) = 19,
    SyncVolume(VolumeRequest) = 20,
    SyncVolumeReply(StatusReply) = 21,
    ReadFsInfo(VolumeRequest) = 22,
    ReadFsInfoReply(ReadFsInfoReply) = 23,
    WriteFsInfo(WriteFsInfoRequest) = 24,
    WriteFsInfoReply(StatusReply) = 25,

    // vnodes
    Lookup(EntryRequest) = 32,
    LookupReply(LookupReply) = 33,
    GetVNodeName(NodeRequest) = 34,
    GetVNodeNameReply(GetVNodeNameReply) = 35,
    ReadVNode(VNodeRequest) = 36,
    ReadVNodeReply(ReadVNodeReply) = 37,
    WriteVNode(VNodeRequest) = 38,
    WriteVNodeReply(StatusReply) = 39,
    FsRemoveVNode(VNodeRequest) = 40,
    FsRemoveVNodeReply(StatusReply) = 41,

    // files
    Ioctl(IoctlRequest) = 48,
    IoctlReply(IoctlReply) = 49,
    Create(CreateRequest) = 50,
    CreateReply(CreateReply) = 51,
    Open(OpenRequest) = 52,
    OpenReply(CookieReply) = 53,
    Close(CookieRequest) = 54,
    CloseReply(StatusReply) = 55,
    FreeCookie(CookieRequest) = 56,
    FreeCookieReply(StatusReply) = 57,
    Read(ReadRequest) = 58,
    ReadReply(ReadReply) = 59,
    Write(WriteRequest) = 60,
    WriteReply(WriteReply) = 61,

    // directories
    CreateDir(CreateDirRequest) = 64,
    CreateDirReply(StatusReply) = 65,
    RemoveDir(EntryRequest) = 66,
    RemoveDirReply(StatusReply) = 67,
    OpenDir(NodeRequest) = 68,
    OpenDirReply(CookieReply) = 69,
    CloseDir(CookieRequest) = 70,
    CloseDirReply(StatusReply) = 71,
    FreeDirCookie(CookieRequest) = 72,
    FreeDirCookieReply(StatusReply) = 73,
    ReadDir(ReadDirRequest) = 74,
    ReadDirReply(ReadDirReply) = 75,
    RewindDir(CookieRequest) = 76,
    RewindDirReply(StatusReply) = 77,

    // attribute directories
    OpenAttrDir(NodeRequest) = 80,
    OpenAttrDirReply(CookieReply) = 81,
    CloseAttrDir(CookieRequest) = 82,
    CloseAttrDirReply(StatusReply) = 83,
    FreeAttrDirCookie(CookieRequest) = 84,
    FreeAttrDirCookieReply(StatusReply) = 85,
    ReadAttrDir(ReadDirRequest) = 86,
    ReadAttrDirReply(ReadDirReply) = 87,
    RewindAttrDir(CookieRequest) = 88,
    RewindAttrDirReply(StatusReply) = 89,

    // attributes
    CreateAttr(CreateAttrRequest) = 96,
    CreateAttrReply(CookieReply) = 97,
    OpenAttr(OpenAttrRequest) = 98,
    OpenAttrReply(CookieReply) = 99,
    CloseAttr(CookieRequest) = 100,
    CloseAttrReply(StatusReply) = 101,
    FreeAttrCookie(CookieRequest) = 102,
    FreeAttrCookieReply(StatusReply) = 103,
    ReadAttr(ReadRequest) = 104,
    ReadAttrReply(ReadReply) = 105,
    WriteAttr(WriteRequest) = 106,
    WriteAttrReply(WriteReply) = 107,
    ReadAttrStat(CookieRequest) = 108,
    ReadAttrStatReply(ReadAttrStatReply) = 109,
    WriteAttrStat(WriteAttrStatRequest) = 110,
    WriteAttrStatReply(StatusReply) = 111,
    RenameAttr(RenameAttrRequest) = 112,
    RenameAttrReply(StatusReply) = 113,
    RemoveAttr(RemoveAttrRequest) = 114,
    RemoveAttrReply(StatusReply) = 115,

    // indices
    OpenIndexDir(VolumeRequest) = 128,
    OpenIndexDirReply(CookieReply) = 129,
    CloseIndexDir(VolumeCookieRequest) = 130,
    CloseIndexDirReply(StatusReply) = 131,
    FreeIndexDirCookie(VolumeCookieRequest) = 132,
    FreeIndexDirCookieReply(StatusReply) = 133,
    ReadIndexDir(ReadVolumeDirRequest) = 134,
    ReadIndexDirReply(ReadDirReply) = 135,
    RewindIndexDir(VolumeCookieRequest) = 136,
    RewindIndexDirReply(StatusReply) = 137,
    CreateIndex(CreateIndexRequest) = 138,
    CreateIndexReply(StatusReply) = 139,
    RemoveIndex(IndexNameRequest) = 140,
    RemoveIndexReply(StatusReply) = 141,
    ReadIndexStat(IndexNameRequest) = 142,
    ReadIndexStatReply(ReadIndexStatReply) = 143,

    // queries
    OpenQuery(OpenQueryRequest) = 160,
    OpenQueryReply(CookieReply) = 161,
    CloseQuery(VolumeCookieRequest) = 162,
    CloseQueryReply(StatusReply) = 163,
    FreeQueryCookie(VolumeCookieRequest) = 164,
    FreeQueryCookieReply(StatusReply) = 165,
    ReadQuery(ReadVolumeDirRequest) = 166,
    ReadQueryReply(ReadDirReply) = 167,
    RewindQuery(VolumeCookieRequest) = 168,
    RewindQueryReply(StatusReply) = 169,

    // host callbacks
    GetVNode(NodeRequest) = 192,
    GetVNodeReply(StatusReply) = 193,
    PutVNode(NodeRequest) = 194,
    PutVNodeReply(StatusReply) = 195,
    NewVNode(NewVNodeRequest) = 196,
    NewVNodeReply(StatusReply) = 197,
    PublishVNode(PublishVNodeRequest) = 198,
    PublishVNodeReply(StatusReply) = 199,
    RemoveVNode(NodeRequest) = 200,
    RemoveVNodeReply(StatusReply) = 201,
    UnremoveVNode(NodeRequest) = 202,
    UnremoveVNodeReply(StatusReply) = 203,
    GetVNodeRemoved(NodeRequest) = 204,
    GetVNodeRemovedReply(GetVNodeRemovedReply) = 205,
    AddNodeListener(AddNodeListenerRequest) = 206,
    AddNodeListenerReply(StatusReply) = 207,
    RemoveNodeListener(RemoveNodeListenerRequest) = 208,
    RemoveNodeListenerReply(StatusReply) = 209,

    // notification forwards
    NotifyListener(NotifyListenerRequest) = 224,
    NotifyListenerReply(StatusReply) = 225,
    NotifySelectEvent(NotifySelectEventRequest) = 226,
    NotifySelectEventReply(StatusReply) = 227,
    NotifyQuery(NotifyQueryRequest) = 228,
    NotifyQueryReply(StatusReply) = 229,
    NodeMonitoringEvent(NodeMonitoringEventRequest) = 230,
    NodeMonitoringEventReply(StatusReply) = 231,
}

impl MessageKind {
    /// Requests take even codes and the matching reply takes the next odd
    /// code. `Disconnect` is the one request without a reply.
    pub fn is_reply(self) -> bool {
        self.code() & 1 == 1
    }
}

impl Message {
    /// Completion status carried by a reply; `None` for requests.
    pub fn reply_status(&self) -> Option<u32> {
        match self {
            Message::UnmountReply(r)
            | Message::SyncVolumeReply(r)
            | Message::WriteFsInfoReply(r)
            | Message::WriteVNodeReply(r)
            | Message::FsRemoveVNodeReply(r)
            | Message::CloseReply(r)
            | Message::FreeCookieReply(r)
            | Message::CreateDirReply(r)
            | Message::RemoveDirReply(r)
            | Message::CloseDirReply(r)
            | Message::FreeDirCookieReply(r)
            | Message::RewindDirReply(r)
            | Message::CloseAttrDirReply(r)
            | Message::FreeAttrDirCookieReply(r)
            | Message::RewindAttrDirReply(r)
            | Message::CloseAttrReply(r)
            | Message::FreeAttrCookieReply(r)
            | Message::WriteAttrStatReply(r)
            | Message::RenameAttrReply(r)
            | Message::RemoveAttrReply(r)
            | Message::CloseIndexDirReply(r)
            | Message::FreeIndexDirCookieReply(r)
            | Message::RewindIndexDirReply(r)
            | Message::CreateIndexReply(r)
            | Message::RemoveIndexReply(r)
            | Message::CloseQueryReply(r)
            | Message::FreeQueryCookieReply(r)
            | Message::RewindQueryReply(r)
            | Message::GetVNodeReply(r)
            | Message::PutVNodeReply(r)
            | Message::NewVNodeReply(r)
            | Message::PublishVNodeReply(r)
            | Message::RemoveVNodeReply(r)
            | Message::UnremoveVNodeReply(r)
            | Message::AddNodeListenerReply(r)
            | Message::RemoveNodeListenerReply(r)
            | Message::NotifyListenerReply(r)
            | Message::NotifySelectEventReply(r)
            | Message::NotifyQueryReply(r)
            | Message::NodeMonitoringEventReply(r) => Some(r.status),
            Message::OpenReply(r)
            | Message::OpenDirReply(r)
            | Message::OpenAttrDirReply(r)
            | Message::CreateAttrReply(r)
            | Message::OpenAttrReply(r)
            | Message::OpenIndexDirReply(r)
            | Message::OpenQueryReply(r) => Some(r.status),
            Message::ReadReply(r) | Message::ReadAttrReply(r) => Some(r.status),
            Message::WriteReply(r) | Message::WriteAttrReply(r) => Some(r.status),
            Message::ReadDirReply(r)
            | Message::ReadAttrDirReply(r)
            | Message::ReadIndexDirReply(r)
            | Message::ReadQueryReply(r) => Some(r.status),
            Message::ConnectReply(r) => Some(r.status),
            Message::MountReply(r) => Some(r.status),
            Message::ReadFsInfoReply(r) => Some(r.status),
            Message::LookupReply(r) => Some(r.status),
            Message::GetVNodeNameReply(r) => Some(r.status),
            Message::ReadVNodeReply(r) => Some(r.status),
            Message::IoctlReply(r) => Some(r.status),
            Message::CreateReply(r) => Some(r.status),
            Message::ReadAttrStatReply(r) => Some(r.status),
            Message::ReadIndexStatReply(r) => Some(r.status),
            Message::GetVNodeRemovedReply(r) => Some(r.status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let bytes = message.encode();
        let decoded = Message::decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_roundtrip_admin_messages() {
        roundtrip(Message::Connect(ConnectRequest {
            fs_name: b"ramfs".to_vec(),
        }));
        roundtrip(Message::ConnectReply(ConnectReply {
            status: STATUS_OK,
            capabilities: 0x3ff,
            port_count: 4,
            server_pid: 4711,
        }));
        roundtrip(Message::Disconnect(DisconnectRequest { reason: 0 }));
    }

    #[test]
    fn test_roundtrip_volume_messages() {
        roundtrip(Message::Mount(MountRequest {
            volume: 3,
            device: b"/dev/disk/0".to_vec(),
            flags: 1,
            parameters: b"ro".to_vec(),
            caller: Caller {
                pid: 99,
                uid: 1000,
                gid: 100,
            },
        }));
        roundtrip(Message::MountReply(MountReply {
            status: STATUS_OK,
            root_id: 1,
            capabilities: 0xffff,
        }));
        roundtrip(Message::ReadFsInfoReply(ReadFsInfoReply {
            status: STATUS_OK,
            info: FsInfo {
                flags: 0,
                block_size: 2048,
                io_size: 65536,
                total_blocks: 1024,
                free_blocks: 512,
                total_nodes: 64,
                free_nodes: 32,
                volume_name: b"scratch".to_vec(),
            },
        }));
        roundtrip(Message::Unmount(VolumeRequest { volume: 3 }));
    }

    #[test]
    fn test_roundtrip_node_and_file_messages() {
        roundtrip(Message::Lookup(EntryRequest {
            volume: 3,
            dir: 1,
            name: b"hello.txt".to_vec(),
        }));
        roundtrip(Message::LookupReply(LookupReply {
            status: STATUS_OK,
            node: 17,
        }));
        roundtrip(Message::ReadVNode(VNodeRequest {
            volume: 3,
            node: 17,
            reenter: true,
        }));
        roundtrip(Message::Read(ReadRequest {
            volume: 3,
            node: 17,
            cookie: 5,
            pos: 4096,
            size: 128,
        }));
        roundtrip(Message::ReadReply(ReadReply {
            status: STATUS_OK,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        }));
        roundtrip(Message::Write(WriteRequest {
            volume: 3,
            node: 17,
            cookie: 5,
            pos: 0,
            data: b"payload".to_vec(),
        }));
        roundtrip(Message::Ioctl(IoctlRequest {
            volume: 3,
            node: 17,
            cookie: 5,
            op: 0x1234,
            buffer: vec![1, 2, 3],
            write_back: true,
        }));
    }

    #[test]
    fn test_roundtrip_directory_messages() {
        roundtrip(Message::ReadDir(ReadDirRequest {
            volume: 3,
            node: 1,
            cookie: 9,
            count: 32,
        }));
        roundtrip(Message::ReadDirReply(ReadDirReply {
            status: STATUS_OK,
            entries: vec![
                DirEntry {
                    node: 17,
                    name: b"hello.txt".to_vec(),
                },
                DirEntry {
                    node: 18,
                    name: b"world.txt".to_vec(),
                },
            ],
        }));
        roundtrip(Message::RewindDir(CookieRequest {
            volume: 3,
            node: 1,
            cookie: 9,
        }));
    }

    #[test]
    fn test_roundtrip_attribute_and_index_messages() {
        roundtrip(Message::CreateAttr(CreateAttrRequest {
            volume: 3,
            node: 17,
            name: b"BEOS:TYPE".to_vec(),
            type_code: 0x4d494d53,
            open_mode: 2,
        }));
        roundtrip(Message::ReadAttrStatReply(ReadAttrStatReply {
            status: STATUS_OK,
            stat: AttrStat {
                type_code: 0x4d494d53,
                size: 25,
            },
        }));
        roundtrip(Message::RenameAttr(RenameAttrRequest {
            volume: 3,
            from_node: 17,
            from_name: b"old".to_vec(),
            to_node: 17,
            to_name: b"new".to_vec(),
        }));
        roundtrip(Message::CreateIndex(CreateIndexRequest {
            volume: 3,
            name: b"size".to_vec(),
            type_code: 1,
            flags: 0,
        }));
        roundtrip(Message::OpenQuery(OpenQueryRequest {
            volume: 3,
            query: b"size > 1024".to_vec(),
            flags: 1,
            token: 77,
        }));
    }

    #[test]
    fn test_roundtrip_callback_messages() {
        roundtrip(Message::GetVNode(NodeRequest {
            volume: 3,
            node: 17,
        }));
        roundtrip(Message::PublishVNode(PublishVNodeRequest {
            volume: 3,
            node: 21,
            capabilities: 0x1ff,
            node_type: 0o100644,
            flags: 0,
        }));
        roundtrip(Message::GetVNodeRemovedReply(GetVNodeRemovedReply {
            status: STATUS_OK,
            removed: false,
        }));
        roundtrip(Message::NotifyListener(NotifyListenerRequest {
            volume: 3,
            op: 2,
            node: 17,
            old_dir: 1,
            new_dir: 4,
            old_name: b"a".to_vec(),
            name: b"b".to_vec(),
        }));
        roundtrip(Message::NotifySelectEvent(NotifySelectEventRequest {
            sync: 0xabcd,
            event: 1,
        }));
        roundtrip(Message::AddNodeListener(AddNodeListenerRequest {
            listener: 8,
            device: 3,
            node: 17,
            flags: 0x5,
        }));
        roundtrip(Message::NodeMonitoringEvent(NodeMonitoringEventRequest {
            listener: 8,
            op: 1,
            device: 3,
            node: 17,
            name: b"hello.txt".to_vec(),
        }));
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let mut seen = std::collections::HashSet::new();
        for message in Message::catalogue_samples() {
            let code = message.kind().code();
            assert!(seen.insert(code), "kind code {} assigned twice", code);
            roundtrip(message);
        }
        // Every code the catalogue maps has a sample.
        for code in 0..=u16::MAX {
            if let Some(kind) = MessageKind::from_code(code) {
                assert!(seen.contains(&code), "{:?} has no sample", kind);
            }
        }
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut bytes = Message::Disconnect(DisconnectRequest { reason: 0 }).encode();
        bytes[0] = 0xff;
        bytes[1] = 0xff;
        match Message::decode(&bytes) {
            Err(WireError::UnknownKind(0xffff)) => {}
            other => panic!("expected UnknownKind, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_truncated_header() {
        match Message::decode(&[0x01]) {
            Err(WireError::Truncated) => {}
            other => panic!("expected Truncated, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let bytes = MessageKind::Mount.code().to_le_bytes().to_vec();
        match Message::decode(&bytes) {
            Err(WireError::Payload { kind, .. }) => assert_eq!(kind, MessageKind::Mount),
            other => panic!("expected Payload error, got {:?}", other),
        }
    }

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(MessageKind::Connect.code(), 0);
        assert_eq!(MessageKind::Mount.code(), 16);
        assert_eq!(MessageKind::Lookup.code(), 32);
        assert_eq!(MessageKind::GetVNode.code(), 192);
        assert_eq!(MessageKind::NodeMonitoringEvent.code(), 230);
        assert_eq!(MessageKind::from_code(17), Some(MessageKind::MountReply));
        assert_eq!(MessageKind::from_code(3), None);
    }

    #[test]
    fn test_reply_status_extraction() {
        let reply = Message::UnmountReply(StatusReply { status: 4 });
        assert_eq!(reply.reply_status(), Some(4));
        let open = Message::OpenReply(CookieReply {
            status: STATUS_OK,
            cookie: 7,
        });
        assert_eq!(open.reply_status(), Some(STATUS_OK));
        let request = Message::Unmount(VolumeRequest { volume: 1 });
        assert_eq!(request.reply_status(), None);
    }

    #[test]
    fn test_reply_kinds_take_odd_codes() {
        assert!(!MessageKind::Mount.is_reply());
        assert!(MessageKind::MountReply.is_reply());
        assert!(!MessageKind::Disconnect.is_reply());
        assert!(MessageKind::NodeMonitoringEventReply.is_reply());
        // The parity rule must agree with the catalogue's naming.
        for code in 0..=231u16 {
            if let Some(kind) = MessageKind::from_code(code) {
                let name = format!("{:?}", kind);
                assert_eq!(kind.is_reply(), name.ends_with("Reply"), "{}", name);
            }
        }
    }
}
