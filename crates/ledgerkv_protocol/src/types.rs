//! Value metadata shared by reads, writes and queries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Version of a committed value.
///
/// A value written by the transaction at position `tx_num` of block
/// `block_num` carries version `(block_num, tx_num)`. Versions are totally
/// ordered by block, then by position within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Block number that committed the value.
    pub block_num: u64,
    /// Index of the committing transaction within its block.
    pub tx_num: u64,
}

impl Version {
    /// Creates a new version.
    pub fn new(block_num: u64, tx_num: u64) -> Self {
        Self { block_num, tx_num }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_num, self.tx_num)
    }
}

/// Access control attached to a key.
///
/// An empty list means "no restriction" for that access kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    /// Users allowed to read the key.
    pub read_users: BTreeSet<String>,
    /// Users allowed to read and write the key.
    pub read_write_users: BTreeSet<String>,
}

impl AccessControl {
    /// Creates an empty access control list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants read access to a user.
    pub fn with_reader(mut self, user: impl Into<String>) -> Self {
        self.read_users.insert(user.into());
        self
    }

    /// Grants read-write access to a user.
    pub fn with_writer(mut self, user: impl Into<String>) -> Self {
        self.read_write_users.insert(user.into());
        self
    }

    /// Returns true if `user` may read the key.
    pub fn can_read(&self, user: &str) -> bool {
        (self.read_users.is_empty() && self.read_write_users.is_empty())
            || self.read_users.contains(user)
            || self.read_write_users.contains(user)
    }

    /// Returns true if `user` may overwrite or delete the key.
    ///
    /// Once any user is listed, only `read_write_users` may write.
    pub fn can_write(&self, user: &str) -> bool {
        (self.read_users.is_empty() && self.read_write_users.is_empty())
            || self.read_write_users.contains(user)
    }
}

/// Metadata stored alongside a committed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Version of the value.
    pub version: Version,
    /// Access control, if any.
    pub acl: Option<AccessControl>,
}

/// A committed value with its metadata, as returned by a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueWithMetadata {
    /// Value bytes.
    pub value: Vec<u8>,
    /// Value metadata.
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        assert!(Version::new(1, 5) < Version::new(2, 0));
        assert!(Version::new(2, 0) < Version::new(2, 1));
        assert_eq!(Version::new(3, 1).to_string(), "3:1");
    }

    #[test]
    fn empty_acl_allows_everyone() {
        let acl = AccessControl::new();
        assert!(acl.can_read("alice"));
        assert!(acl.can_write("alice"));
    }

    #[test]
    fn acl_restricts_writers() {
        let acl = AccessControl::new()
            .with_reader("bob")
            .with_writer("alice");

        assert!(acl.can_read("alice"));
        assert!(acl.can_read("bob"));
        assert!(!acl.can_read("carol"));

        assert!(acl.can_write("alice"));
        assert!(!acl.can_write("bob"));
    }

    #[test]
    fn reader_only_acl_locks_writes() {
        let acl = AccessControl::new().with_reader("bob");

        assert!(acl.can_read("bob"));
        assert!(!acl.can_read("alice"));
        assert!(!acl.can_write("bob"));
        assert!(!acl.can_write("alice"));
    }
}
