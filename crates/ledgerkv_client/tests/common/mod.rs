//! Shared helpers: sessions wired to an in-memory replica over loopback.

#![allow(dead_code)]

use ledgerkv_client::{
    ConnectionConfig, HttpConnector, LoopbackClient, LoopbackServer, PollConfig, ReplicaEndpoint,
    Session, SessionConfig,
};
use ledgerkv_testkit::{demo_replica, signer_for, MemoryReplica, ReplicaConfig};
use std::sync::Arc;
use std::time::Duration;

/// Loopback server routing CBOR bodies to a shared in-memory replica.
#[derive(Clone)]
pub struct ReplicaHandle(pub Arc<MemoryReplica>);

impl LoopbackServer for ReplicaHandle {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body).map_err(|e| e.to_string())
    }
}

pub type TestConnector = HttpConnector<LoopbackClient<ReplicaHandle>>;

pub fn replica(block_size: usize, auto_seal: bool) -> Arc<MemoryReplica> {
    Arc::new(demo_replica(
        ReplicaConfig::new("node1")
            .with_block_size(block_size)
            .with_auto_seal(auto_seal),
    ))
}

pub fn fast_poll() -> PollConfig {
    PollConfig::new(Duration::from_millis(2), Duration::from_secs(2))
}

pub fn connect_with(
    replica: &Arc<MemoryReplica>,
    user: &str,
    poll: PollConfig,
) -> Session<TestConnector> {
    let config = ConnectionConfig::new(vec![ReplicaEndpoint::new("node1", "http://node1:6001")]);
    let connector = HttpConnector::new(
        &config,
        LoopbackClient::new(ReplicaHandle(Arc::clone(replica))),
    )
    .unwrap();
    Session::open(
        connector,
        Arc::new(signer_for(user)),
        SessionConfig::new().with_poll(poll),
    )
    .unwrap()
}

pub fn connect(replica: &Arc<MemoryReplica>, user: &str) -> Session<TestConnector> {
    connect_with(replica, user, fast_poll())
}
