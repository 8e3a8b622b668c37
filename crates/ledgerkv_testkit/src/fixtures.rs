//! Ready-made replicas, users and keys.

use crate::replica::{MemoryReplica, ReplicaConfig};
use ledgerkv_protocol::HmacSigner;

/// Database created by [`demo_replica`].
pub const DEMO_DB: &str = "bdb";

/// Users registered by [`demo_replica`].
pub const DEMO_USERS: [&str; 3] = ["alice", "bob", "charlie"];

/// Returns the deterministic signing key of a fixture user.
pub fn user_key(user_id: &str) -> Vec<u8> {
    format!("{}-signing-key", user_id).into_bytes()
}

/// Returns a signer for a fixture user.
pub fn signer_for(user_id: &str) -> HmacSigner {
    HmacSigner::new(user_id, user_key(user_id))
}

/// Creates a replica with database [`DEMO_DB`] and the [`DEMO_USERS`].
pub fn demo_replica(config: ReplicaConfig) -> MemoryReplica {
    DEMO_USERS
        .iter()
        .fold(MemoryReplica::new(config), |replica, user| {
            replica.with_user(*user, user_key(user))
        })
        .with_database(DEMO_DB)
}
