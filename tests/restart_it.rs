mod common;

use std::sync::Arc;

use tempfile::TempDir;

use quorum::raft::server::{Shutdown, Status};
use quorum::{MachineRouter, Peer, Role, ServerBuilder, StateMachine, StaticMembership};

use common::{kv_write, KvMachine, KV_COMMAND_ID};

/// Writes committed against the durable log come back after a restart: a
/// fresh state machine is rebuilt by replay up to the persisted commit
/// index.
#[actix_rt::test]
async fn restart_replays_the_durable_log() {
    let tmp = TempDir::new().unwrap();
    let state_dir = tmp.path().join("state");
    let log_dir = tmp.path().join("log");

    // first life: a single durable server commits three writes
    {
        let kv = Arc::new(KvMachine::new());
        let router = MachineRouter::new();
        router.register(KV_COMMAND_ID, kv.clone());

        let membership = Arc::new(StaticMembership::new());
        let (addr, handle) = ServerBuilder::new()
            .with_log_dir(&log_dir)
            .with_state_machine(Arc::new(router) as Arc<dyn StateMachine>)
            .with_membership(membership.clone())
            .with_state_dir(&state_dir)
            .with_heartbeat_interval(500)
            .with_term_timeout(1000)
            .init(1)
            .build()
            .expect("server builds");
        membership.register(handle.clone());

        handle.start();
        common::sleep(100).await;

        handle.send(kv_write("k", "v1"), None);
        handle.send(kv_write("k", "v2"), None);
        handle.send(kv_write("k", "v3"), None);
        common::sleep(500).await;

        let status = addr.send(Status).await.unwrap();
        assert_eq!(status.role, Role::Leader);
        assert_eq!(status.commit_index, 3);
        assert_eq!(kv.get("k").as_deref(), Some("v3"));

        addr.send(Shutdown).await.unwrap();
        common::sleep(100).await;
    }

    // second life: same directories, fresh machine, no `init`
    let kv = Arc::new(KvMachine::new());
    let router = MachineRouter::new();
    router.register(KV_COMMAND_ID, kv.clone());

    let membership = Arc::new(StaticMembership::new());
    let (addr, handle) = ServerBuilder::new()
        .with_log_dir(&log_dir)
        .with_state_machine(Arc::new(router) as Arc<dyn StateMachine>)
        .with_membership(membership.clone())
        .with_state_dir(&state_dir)
        .with_heartbeat_interval(500)
        .with_term_timeout(1000)
        .build()
        .expect("server reloads");
    membership.register(handle);

    // replay happened during construction, before any traffic
    let status = addr.send(Status).await.unwrap();
    assert_eq!(status.server_id, 1);
    assert_eq!(status.commit_index, 3);
    assert_eq!(status.last_log_index, 3);
    assert_eq!(kv.get("k").as_deref(), Some("v3"));

    addr.send(Shutdown).await.ok();
}

/// A reloaded server keeps accepting writes where the old one left off.
#[actix_rt::test]
async fn reloaded_server_continues_the_log() {
    let tmp = TempDir::new().unwrap();
    let state_dir = tmp.path().join("state");
    let log_dir = tmp.path().join("log");

    {
        let kv = Arc::new(KvMachine::new());
        let router = MachineRouter::new();
        router.register(KV_COMMAND_ID, kv.clone());

        let membership = Arc::new(StaticMembership::new());
        let (addr, handle) = ServerBuilder::new()
            .with_log_dir(&log_dir)
            .with_state_machine(Arc::new(router) as Arc<dyn StateMachine>)
            .with_membership(membership.clone())
            .with_state_dir(&state_dir)
            .with_heartbeat_interval(500)
            .with_term_timeout(1000)
            .init(1)
            .build()
            .unwrap();
        membership.register(handle.clone());
        handle.start();
        common::sleep(100).await;

        handle.send(kv_write("k", "v1"), None);
        common::sleep(300).await;
        addr.send(Shutdown).await.unwrap();
        common::sleep(100).await;
    }

    let kv = Arc::new(KvMachine::new());
    let router = MachineRouter::new();
    router.register(KV_COMMAND_ID, kv.clone());

    let membership = Arc::new(StaticMembership::new());
    let (addr, handle) = ServerBuilder::new()
        .with_log_dir(&log_dir)
        .with_state_machine(Arc::new(router) as Arc<dyn StateMachine>)
        .with_membership(membership.clone())
        .with_state_dir(&state_dir)
        .with_heartbeat_interval(500)
        .with_term_timeout(1000)
        .build()
        .unwrap();
    membership.register(handle.clone());
    handle.start();
    common::sleep(100).await;

    handle.send(kv_write("k", "v2"), None);
    common::sleep(300).await;

    let status = addr.send(Status).await.unwrap();
    assert_eq!(status.commit_index, 2);
    assert_eq!(kv.get("k").as_deref(), Some("v2"));

    addr.send(Shutdown).await.ok();
}
