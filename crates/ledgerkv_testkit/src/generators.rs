//! Property-based test generators using proptest.

use ledgerkv_protocol::AccessControl;
use proptest::prelude::*;

/// Strategy for generating database names.
pub fn db_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for generating keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9][a-zA-Z0-9_.-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for generating access control lists over a set of users.
pub fn acl_strategy(users: &'static [&'static str]) -> impl Strategy<Value = AccessControl> {
    (
        prop::sample::subsequence(users, 0..=users.len()),
        prop::sample::subsequence(users, 0..=users.len()),
    )
        .prop_map(|(readers, writers)| {
            let acl = readers
                .into_iter()
                .fold(AccessControl::new(), |acl, u| acl.with_reader(u));
            writers.into_iter().fold(acl, |acl, u| acl.with_writer(u))
        })
}

/// How two transactions touching the same key are interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interleaving {
    /// Index (0 or 1) of the transaction that reads first.
    pub first_reader: usize,
    /// Index (0 or 1) of the transaction that commits first.
    pub first_committer: usize,
    /// Whether a block is cut between the two commits.
    pub seal_between: bool,
    /// Replica block size.
    pub block_size: usize,
}

/// Strategy for generating interleavings of two conflicting transactions.
pub fn interleaving_strategy() -> impl Strategy<Value = Interleaving> {
    (0usize..2, 0usize..2, any::<bool>(), 1usize..4).prop_map(
        |(first_reader, first_committer, seal_between, block_size)| Interleaving {
            first_reader,
            first_committer,
            seal_between,
            block_size,
        },
    )
}
