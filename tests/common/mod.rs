#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use actix::Addr;
use serde::{Deserialize, Serialize};

use quorum::raft::server::{RaftServer, Shutdown, Status, StatusInfo};
use quorum::raft::types::{Command, CommandListener, CommandWaiter, ServerId};
use quorum::{
    MachineRouter, MemoryLog, Peer, ProxyPeer, Role, ServerBuilder, StateMachine, StaticMembership,
};

/// Stable identifier for the key-value commands used by the tests.
pub const KV_COMMAND_ID: &str = "kv-store";

#[derive(Debug, Serialize, Deserialize)]
struct KvWrite {
    key: String,
    value: String,
}

/// Key-value state machine used to observe replication from the outside.
#[derive(Default)]
pub struct KvMachine {
    map: RwLock<HashMap<String, String>>,
}

impl KvMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.read().unwrap().get(key).cloned()
    }
}

impl StateMachine for KvMachine {
    fn apply(&self, command: &Command) {
        let write: KvWrite =
            bincode::deserialize(command.payload()).expect("well-formed kv command");
        self.map.write().unwrap().insert(write.key, write.value);
    }
}

/// Builds the command writing `key = value`.
pub fn kv_write(key: &str, value: &str) -> Command {
    let write = KvWrite {
        key: key.to_string(),
        value: value.to_string(),
    };
    Command::new(KV_COMMAND_ID, bincode::serialize(&write).unwrap())
}

/// An in-process cluster of servers joined through disconnectable proxy
/// links, with one key-value machine per server.
pub struct LocalCluster {
    servers: HashMap<ServerId, Addr<RaftServer>>,
    proxies: HashMap<ServerId, Arc<ProxyPeer>>,
    machines: HashMap<ServerId, Arc<KvMachine>>,
}

impl LocalCluster {
    pub fn new(size: u64, tmp_dir: &Path) -> Self {
        Self::with_timing(size, tmp_dir, 500, 1000)
    }

    pub fn with_timing(size: u64, tmp_dir: &Path, heartbeat_ms: u64, term_timeout_ms: u64) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let membership = Arc::new(StaticMembership::new());
        let mut servers = HashMap::new();
        let mut proxies = HashMap::new();
        let mut machines = HashMap::new();

        for id in 1..=size {
            let kv = Arc::new(KvMachine::new());
            let router = MachineRouter::new();
            router.register(KV_COMMAND_ID, kv.clone());

            let (addr, handle) = ServerBuilder::new()
                .with_log(Box::new(MemoryLog::new(Arc::new(router))))
                .with_membership(membership.clone())
                .with_state_dir(tmp_dir.join(id.to_string()))
                .with_heartbeat_interval(heartbeat_ms)
                .with_term_timeout(term_timeout_ms)
                .init(id)
                .build()
                .expect("server builds");

            let proxy = Arc::new(ProxyPeer::new(handle));
            membership.register(proxy.clone());

            servers.insert(id, addr);
            proxies.insert(id, proxy);
            machines.insert(id, kv);
        }

        Self {
            servers,
            proxies,
            machines,
        }
    }

    pub fn start(&self) {
        for proxy in self.proxies.values() {
            proxy.start();
        }
    }

    pub fn shutdown(&self) {
        for server in self.servers.values() {
            server.do_send(Shutdown);
        }
    }

    pub async fn status(&self, id: ServerId) -> StatusInfo {
        self.servers[&id].send(Status).await.expect("server alive")
    }

    pub async fn statuses(&self) -> Vec<StatusInfo> {
        let mut all = Vec::new();
        for server in self.servers.values() {
            all.push(server.send(Status).await.expect("server alive"));
        }
        all
    }

    /// The proxy of the current leader, if one has emerged. Two leaders in
    /// the same term would be an election-safety violation and panic.
    pub async fn leader(&self) -> Option<Arc<ProxyPeer>> {
        let mut leader: Option<StatusInfo> = None;
        for status in self.statuses().await {
            if status.role != Role::Leader {
                continue;
            }
            match &leader {
                Some(existing) if existing.term == status.term => {
                    panic!("two leaders in term {}", status.term)
                }
                Some(existing) if existing.term > status.term => {}
                _ => leader = Some(status),
            }
        }
        leader.map(|status| self.proxies[&status.server_id].clone())
    }

    /// A proxy currently in the follower role.
    pub async fn follower(&self) -> Arc<ProxyPeer> {
        for status in self.statuses().await {
            if status.role == Role::Follower {
                return self.proxies[&status.server_id].clone();
            }
        }
        panic!("no follower in the cluster");
    }

    /// Fire-and-forget write through the current leader.
    pub async fn send_update(&self, key: &str, value: &str) {
        let leader = self.leader().await.expect("a leader is known");
        leader.send(kv_write(key, value), None);
    }

    /// Tracked write through the given peer.
    pub fn send_tracked(&self, peer: &Arc<ProxyPeer>, key: &str, value: &str) -> CommandWaiter {
        let (listener, waiter) = CommandListener::channel();
        peer.send(kv_write(key, value), Some(listener));
        waiter
    }

    pub async fn check_terms(&self) -> bool {
        let statuses = self.statuses().await;
        statuses.windows(2).all(|w| w[0].term == w[1].term)
    }

    pub async fn check_commit_index(&self) -> bool {
        let statuses = self.statuses().await;
        statuses
            .windows(2)
            .all(|w| w[0].commit_index == w[1].commit_index)
    }

    /// True when every machine agrees on the value of `key`.
    pub fn check_key(&self, key: &str) -> bool {
        let mut values = self.machines.values().map(|kv| kv.get(key));
        let first = values.next().expect("at least one server");
        values.all(|value| value == first)
    }

    pub fn value_of(&self, id: ServerId, key: &str) -> Option<String> {
        self.machines[&id].get(key)
    }

    pub fn machine(&self, id: ServerId) -> Arc<KvMachine> {
        self.machines[&id].clone()
    }
}

pub async fn sleep(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
