//! Credential store for guardup
//!
//! Holds one record per WireGuard peer: its name, overlay address, key pair
//! and the subnets it may route. The host endpoint is stored as a regular
//! record under the reserved name [`HOST_PEER_NAME`].
//!
//! The store only exposes four operations through [`PeerStore`]. Records are
//! immutable once written; there is no update path.

pub mod error;
pub mod sqlite;

use std::fmt;

pub use error::{Error, Result};
pub use sqlite::SqliteStore;

/// Reserved record name for the VPN endpoint itself
pub const HOST_PEER_NAME: &str = "Host";

/// A persisted peer record
#[derive(Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Surrogate key assigned by the store, never reused
    pub id: i64,
    /// Unique peer name
    pub name: String,
    /// Address of the peer inside the overlay network
    pub address: String,
    /// Public key (base64)
    pub public_key: String,
    /// Private key (base64)
    pub private_key: String,
    /// Comma-separated CIDR list the peer is allowed to route
    pub allowed_ips: String,
}

impl PeerRecord {
    /// Whether this record describes the VPN host
    pub fn is_host(&self) -> bool {
        self.name == HOST_PEER_NAME
    }
}

impl fmt::Debug for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("allowed_ips", &self.allowed_ips)
            .finish()
    }
}

/// A record that has not been inserted yet
#[derive(Clone)]
pub struct NewPeer {
    pub name: String,
    pub address: String,
    pub public_key: String,
    pub private_key: String,
    pub allowed_ips: String,
}

impl NewPeer {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidRecord("name must not be empty".into()));
        }
        if self.public_key.is_empty() || self.private_key.is_empty() {
            return Err(Error::InvalidRecord(format!(
                "keys for '{}' must not be empty",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for NewPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewPeer")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("allowed_ips", &self.allowed_ips)
            .finish()
    }
}

/// Narrow interface over the durable peer table
pub trait PeerStore {
    /// Insert a new record and return its id.
    ///
    /// Fails with [`Error::DuplicateName`] if a record with the same name
    /// exists. The check and the insert happen atomically.
    fn insert(&mut self, peer: &NewPeer) -> Result<i64>;

    /// Look up a record by name
    fn find_by_name(&self, name: &str) -> Result<PeerRecord>;

    /// Delete a record by name
    fn delete_by_name(&mut self, name: &str) -> Result<()>;

    /// All records in insertion (id) order
    fn list_all(&self) -> Result<Vec<PeerRecord>>;
}

impl<S: PeerStore + ?Sized> PeerStore for Box<S> {
    fn insert(&mut self, peer: &NewPeer) -> Result<i64> {
        (**self).insert(peer)
    }

    fn find_by_name(&self, name: &str) -> Result<PeerRecord> {
        (**self).find_by_name(name)
    }

    fn delete_by_name(&mut self, name: &str) -> Result<()> {
        (**self).delete_by_name(name)
    }

    fn list_all(&self) -> Result<Vec<PeerRecord>> {
        (**self).list_all()
    }
}
