// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! UserFS Bridge: host side of the userland filesystem protocol
//!
//! The bridge lets the host VFS drive filesystems that live in a separate
//! server process. Each connected server is a [`FileSystem`] endpoint
//! holding a pool of request ports; each mount is a [`Volume`] whose
//! operations are single request/reply round trips. While a caller blocks
//! for a reply, requests the server sends back on the same port are
//! serviced on the caller's thread, which is what makes nested callback
//! chains deadlock free.
//!
//! The host environment plugs in through [`HostVnodeOps`]; endpoints are
//! looked up by name in a [`UserlandFs`] registry.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod file_system;
pub mod host;
pub mod listener;
pub mod ops;
pub mod pool;
pub mod port;
pub mod registry;
#[cfg(feature = "testing")]
pub mod testing;
pub mod types;
pub mod volume;

pub use config::BridgeConfig;
pub use error::{check_status, status, BridgeError, BridgeResult};
pub use file_system::{EndpointState, FileSystem};
pub use host::{HostVnodeOps, NodeEventSink};
pub use listener::NodeListenerProxy;
pub use ops::{VnodeOps, VnodeOpsCache};
pub use pool::{PortReleaser, RequestPortPool};
pub use port::RequestPort;
pub use registry::UserlandFs;
pub use types::{
    notify_op, ChangeEvent, ListenerKey, NodeId, NodeWatchFlags, SelectSyncHandle,
    VolumeCapabilities, VolumeId, WatchToken,
};
pub use volume::Volume;

// Payload types the host works with directly.
pub use userfs_proto::messages::{AttrStat, DirEntry, FsInfo};
