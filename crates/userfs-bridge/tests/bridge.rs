// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end exercises of the bridge against a scripted in-process
//! server.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use userfs_bridge::testing::{
    answer_everything, RecordingHost, Script, ScriptedServer, ServerHarness,
};
use userfs_bridge::{
    notify_op, BridgeConfig, BridgeError, EndpointState, FileSystem, HostVnodeOps, NodeId,
    NodeWatchFlags, RequestPort, SelectSyncHandle, UserlandFs, VolumeCapabilities, VolumeId,
};
use userfs_proto::messages::{
    AddNodeListenerRequest, LookupReply, MountReply, NodeRequest, NotifyListenerRequest,
    NotifySelectEventRequest, RemoveNodeListenerRequest, StatusReply,
};
use userfs_proto::{Message, STATUS_OK};

fn test_config() -> BridgeConfig {
    BridgeConfig {
        port_count: 2,
        notification_timeout_ms: 50,
        ..BridgeConfig::default()
    }
}

fn connect_endpoint(
    script: Arc<Script>,
) -> (Arc<FileSystem>, Arc<RecordingHost>, RequestPort, ScriptedServer) {
    userfs_bridge::testing::init_test_logging();
    let config = test_config();
    let ServerHarness {
        ports,
        notification_port,
        server_notification_port,
        server,
    } = ScriptedServer::spawn(&config, script).unwrap();
    let host = Arc::new(RecordingHost::new());
    let fs = FileSystem::connect(
        "testfs",
        Arc::clone(&host) as Arc<dyn HostVnodeOps>,
        config,
        ports,
        notification_port,
    )
    .unwrap();
    (fs, host, server_notification_port, server)
}

#[test]
fn test_connect_negotiates_capabilities() {
    let (fs, _host, _notif, _server) = connect_endpoint(answer_everything());
    assert_eq!(fs.state(), EndpointState::Operating);
    assert_eq!(fs.capabilities(), VolumeCapabilities::all());
    assert_eq!(fs.server_pid(), std::process::id());
    assert_eq!(fs.pool().free_ports(), 2);
}

#[test]
fn test_mount_and_file_operations() -> anyhow::Result<()> {
    let (fs, _host, _notif, _server) = connect_endpoint(answer_everything());

    let volume = fs.mount(b"/dev/test", 0, b"")?;
    assert_eq!(volume.root_id(), Some(NodeId(1)));
    assert_eq!(fs.volume_count(), 1);

    let info = volume.read_fs_info()?;
    assert_eq!(info.block_size, 4096);
    assert_eq!(info.volume_name, b"scripted".to_vec());

    let node = volume.lookup(NodeId(1), b"file")?;
    assert_eq!(node, NodeId(2));

    let cookie = volume.open(node, 0)?;
    let data = volume.read(node, cookie, 0, 16)?;
    assert_eq!(data.len(), 16);
    let written = volume.write(node, cookie, 0, b"payload")?;
    assert_eq!(written, 7);
    volume.close(node, cookie)?;
    volume.free_cookie(node, cookie)?;

    volume.unmount()?;
    assert_eq!(fs.volume_count(), 0);
    Ok(())
}

#[test]
fn test_failed_remote_unmount_still_removes_volume() {
    let script: Arc<Script> = Arc::new(|message, port| {
        if matches!(message, Message::Unmount(_)) {
            // Generic remote failure.
            let _ = port.send(&Message::UnmountReply(StatusReply { status: 1 }));
            true
        } else {
            false
        }
    });
    let (fs, _host, _notif, _server) = connect_endpoint(script);
    let registry = UserlandFs::new();
    registry.register_file_system(Arc::clone(&fs)).unwrap();

    let volume = fs.mount(b"/dev/test", 0, b"").unwrap();
    assert!(volume.unmount().is_err());
    // The mount is gone regardless of what the server said.
    assert_eq!(fs.volume_count(), 0);

    drop(volume);
    drop(fs);
    registry.unregister_file_system("testfs").unwrap();
}

#[test]
fn test_nested_callback_during_lookup() {
    let script: Arc<Script> = Arc::new(|message, port| {
        if let Message::Lookup(req) = message {
            // Ask the host for a vnode on the same port before answering.
            port.send(&Message::GetVNode(NodeRequest {
                volume: req.volume,
                node: 99,
            }))
            .unwrap();
            match port.receive(Some(Duration::from_secs(2))).unwrap() {
                Message::GetVNodeReply(reply) => assert_eq!(reply.status, STATUS_OK),
                other => panic!("expected GetVNodeReply, got {other:?}"),
            }
            port.send(&Message::LookupReply(LookupReply {
                status: STATUS_OK,
                node: 7,
            }))
            .unwrap();
            true
        } else {
            false
        }
    });
    let (fs, host, _notif, _server) = connect_endpoint(script);

    let volume = fs.mount(b"/dev/test", 0, b"").unwrap();
    let node = volume.lookup(NodeId(1), b"file").unwrap();
    assert_eq!(node, NodeId(7));

    // The callback ran on the caller's port before the reply came back.
    let calls = host.calls();
    assert!(
        calls.contains(&format!("get_vnode {} {}", volume.id(), NodeId(99))),
        "host calls were {calls:?}"
    );
}

#[test]
fn test_nodes_with_equal_capabilities_share_a_dispatch_table() {
    let (fs, _host, _notif, _server) = connect_endpoint(answer_everything());

    let volume = fs.mount(b"/dev/test", 0, b"").unwrap();
    let first = volume.read_vnode(NodeId(5), false).unwrap();
    let second = volume.read_vnode(NodeId(6), false).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    // The mount advertised the same capability set, so even the volume's
    // own table is the same instance.
    assert!(Arc::ptr_eq(&first, &volume.ops().unwrap()));
}

#[test]
fn test_missing_capabilities_fail_locally() {
    let script: Arc<Script> = Arc::new(|message, port| {
        if matches!(message, Message::Mount(_)) {
            let caps = VolumeCapabilities::LOOKUP | VolumeCapabilities::OPEN;
            port.send(&Message::MountReply(MountReply {
                status: STATUS_OK,
                root_id: 1,
                capabilities: caps.bits(),
            }))
            .unwrap();
            true
        } else {
            false
        }
    });
    let (fs, _host, _notif, _server) = connect_endpoint(script);

    let volume = fs.mount(b"/dev/test", 0, b"").unwrap();
    let ops = volume.ops().unwrap();
    assert!(ops.supports(VolumeCapabilities::LOOKUP));
    assert!(!ops.supports(VolumeCapabilities::WRITE));

    assert_eq!(ops.lookup(&volume, NodeId(1), b"file"), Ok(NodeId(2)));
    // No round trip happens for an absent capability.
    assert_eq!(
        ops.write(&volume, NodeId(1), 1, 0, b"x"),
        Err(BridgeError::NotSupported)
    );
}

#[test]
fn test_dead_server_fails_fast_and_still_unmounts() {
    let (fs, host, _notif, server) = connect_endpoint(answer_everything());
    let volume = fs.mount(b"/dev/test", 0, b"").unwrap();

    drop(server);

    // The first operation trips over the dead transport and poisons the
    // pool at release.
    assert_eq!(volume.sync(), Err(BridgeError::NotReady));
    assert!(fs.pool().is_disconnected());
    assert_eq!(volume.read_fs_info(), Err(BridgeError::NotReady));

    // "." still resolves so the root stays reachable.
    assert_eq!(volume.lookup(NodeId(1), b"."), Ok(NodeId(1)));
    assert!(host
        .calls()
        .contains(&format!("get_vnode {} {}", volume.id(), NodeId(1))));
    assert_eq!(
        volume.lookup(NodeId(1), b"file"),
        Err(BridgeError::NotReady)
    );

    // And the volume can still be unmounted.
    assert!(volume.unmount().is_err());
    assert_eq!(fs.volume_count(), 0);
}

#[test]
fn test_notification_port_drives_host_notifications() {
    let (fs, host, notif, _server) = connect_endpoint(answer_everything());
    let volume = fs.mount(b"/dev/test", 0, b"").unwrap();

    notif
        .send(&Message::NotifyListener(NotifyListenerRequest {
            volume: volume.id().0,
            op: notify_op::ENTRY_CREATED,
            node: 5,
            old_dir: 1,
            new_dir: 1,
            old_name: Vec::new(),
            name: b"new-file".to_vec(),
        }))
        .unwrap();

    match notif.receive(Some(Duration::from_secs(2))).unwrap() {
        Message::NotifyListenerReply(reply) => assert_eq!(reply.status, STATUS_OK),
        other => panic!("expected NotifyListenerReply, got {other:?}"),
    }
    let events = host.listener_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].op, notify_op::ENTRY_CREATED);
    assert_eq!(events[0].name, b"new-file".to_vec());
}

#[test]
fn test_select_event_forward_requires_registration() {
    let (fs, host, notif, _server) = connect_endpoint(answer_everything());

    let send_event = || {
        notif
            .send(&Message::NotifySelectEvent(NotifySelectEventRequest {
                sync: 11,
                event: 1,
            }))
            .unwrap();
        match notif.receive(Some(Duration::from_secs(2))).unwrap() {
            Message::NotifySelectEventReply(reply) => reply.status,
            other => panic!("expected NotifySelectEventReply, got {other:?}"),
        }
    };

    // Unknown handle: rejected, the host never sees it.
    assert_eq!(send_event(), userfs_bridge::status::BAD_VALUE);
    assert!(host.select_events().is_empty());

    fs.register_select_sync(SelectSyncHandle(11));
    assert_eq!(send_event(), STATUS_OK);
    assert_eq!(host.select_events(), vec![(SelectSyncHandle(11), 1)]);
}

#[test]
fn test_node_listener_registration_and_forwarding() {
    let forwarded: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let script: Arc<Script> = {
        let forwarded = Arc::clone(&forwarded);
        Arc::new(move |message, _port| {
            if matches!(message, Message::NodeMonitoringEvent(_)) {
                forwarded.lock().unwrap().push(message.clone());
            }
            false
        })
    };
    let (fs, host, notif, _server) = connect_endpoint(script);
    let volume = fs.mount(b"/dev/test", 0, b"").unwrap();

    let add = |flags: NodeWatchFlags| {
        notif
            .send(&Message::AddNodeListener(AddNodeListenerRequest {
                listener: 8,
                device: volume.id().0,
                node: 17,
                flags: flags.bits(),
            }))
            .unwrap();
        match notif.receive(Some(Duration::from_secs(2))).unwrap() {
            Message::AddNodeListenerReply(reply) => assert_eq!(reply.status, STATUS_OK),
            other => panic!("expected AddNodeListenerReply, got {other:?}"),
        }
    };

    add(NodeWatchFlags::WATCH_STAT);
    assert_eq!(host.watch_count(), 1);
    assert_eq!(fs.listener_count(), 1);

    // Same subscription again: idempotent, flags widened.
    add(NodeWatchFlags::WATCH_STAT | NodeWatchFlags::WATCH_NAME);
    assert_eq!(host.watch_count(), 1);
    assert_eq!(
        host.watch_flags(volume.id(), NodeId(17)),
        Some(NodeWatchFlags::WATCH_STAT | NodeWatchFlags::WATCH_NAME)
    );

    // A host-side event reaches the server as a monitoring round trip.
    let sink = host.sink(volume.id(), NodeId(17)).unwrap();
    sink.node_event(&userfs_bridge::ChangeEvent::simple(
        notify_op::STAT_CHANGED,
        volume.id(),
        NodeId(1),
        NodeId(17),
        b"watched",
    ));
    assert_eq!(forwarded.lock().unwrap().len(), 1);

    // Removing an unknown key is an addressing error.
    notif
        .send(&Message::RemoveNodeListener(RemoveNodeListenerRequest {
            listener: 9,
            device: volume.id().0,
            node: 17,
        }))
        .unwrap();
    match notif.receive(Some(Duration::from_secs(2))).unwrap() {
        Message::RemoveNodeListenerReply(reply) => {
            assert_eq!(reply.status, userfs_bridge::status::BAD_VALUE)
        }
        other => panic!("expected RemoveNodeListenerReply, got {other:?}"),
    }

    notif
        .send(&Message::RemoveNodeListener(RemoveNodeListenerRequest {
            listener: 8,
            device: volume.id().0,
            node: 17,
        }))
        .unwrap();
    match notif.receive(Some(Duration::from_secs(2))).unwrap() {
        Message::RemoveNodeListenerReply(reply) => assert_eq!(reply.status, STATUS_OK),
        other => panic!("expected RemoveNodeListenerReply, got {other:?}"),
    }
    assert_eq!(host.watch_count(), 0);
    assert_eq!(fs.listener_count(), 0);
}

#[test]
fn test_parallel_callers_share_the_port_pool() {
    let (fs, _host, _notif, _server) = connect_endpoint(answer_everything());
    let volume = fs.mount(b"/dev/test", 0, b"").unwrap();

    // More callers than pooled ports: everyone must complete.
    let workers: Vec<_> = (0..6)
        .map(|_| {
            let volume = Arc::clone(&volume);
            thread::spawn(move || {
                for _ in 0..10 {
                    volume.sync().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(fs.pool().free_ports(), 2);
}

#[test]
fn test_endpoint_drop_sends_farewell() {
    let (fs, _host, notif, _server) = connect_endpoint(answer_everything());
    drop(fs);
    match notif.receive(Some(Duration::from_secs(2))).unwrap() {
        Message::Disconnect(_) => {}
        other => panic!("expected Disconnect, got {other:?}"),
    }
}
