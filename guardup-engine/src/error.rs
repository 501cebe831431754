//! Error types for the guardup engine

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing peers and their configuration files
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential store error
    #[error("store error: {0}")]
    Store(#[from] guardup_store::Error),

    /// Peer name, address or subnet list rejected before any mutation
    #[error("invalid peer: {0}")]
    InvalidPeer(String),

    /// The reserved host name was used for a peer operation
    #[error("'{0}' is reserved for the VPN host")]
    ReservedName(String),

    /// A peer with this name already exists
    #[error("peer '{0}' already exists")]
    PeerAlreadyExists(String),

    /// No peer with this name exists
    #[error("peer '{0}' not found")]
    PeerNotFound(String),

    /// The host record has not been created yet
    #[error("host is not provisioned, run host initialization first")]
    HostNotProvisioned,

    /// The canonical WireGuard configuration already exists
    #[error("host configuration already exists at {0:?}")]
    HostConfigExists(PathBuf),

    /// A host record exists without a matching configuration file
    #[error("host record already exists in the store but no configuration file was found")]
    HostAlreadyProvisioned,

    /// Template references a field that was not supplied
    #[error("template placeholder '{0}' has no value")]
    MissingPlaceholder(String),

    /// Template source could not be read
    #[error("cannot read template {path:?}: {source}")]
    UnreadableTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template syntax error
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    /// The interface configuration file has not been created
    #[error("interface configuration {0:?} does not exist, initialize the host first")]
    ConfigNotInitialized(PathBuf),

    /// A file already exists where the host configuration would be linked
    #[error("{0:?} already exists")]
    AlreadyInitialized(PathBuf),

    /// No block for this peer exists in the interface configuration file
    #[error("no configuration block for peer '{0}'")]
    PeerBlockNotFound(String),

    /// Store has the peer, the interface file does not
    #[error("peer '{name}' was stored but its configuration block was not written: {source}")]
    PartialAdd {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Store lost the peer, the interface file may still have its block
    #[error("peer '{name}' was deleted from the store but its configuration block was not removed: {source}")]
    PartialDelete {
        name: String,
        #[source]
        source: Box<Error>,
    },

    /// Host record was stored but the interface file was not created
    #[error("host record was stored but the interface configuration was not created: {source}")]
    PartialInit {
        #[source]
        source: Box<Error>,
    },

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeygenFailed(String),

    /// No provisioning encoder is available
    #[error("provisioning encoder unavailable: {0}")]
    EncodingUnavailable(String),

    /// Provisioning encoder ran but failed
    #[error("provisioning encoder failed: {0}")]
    Encoding(String),
}

impl Error {
    /// Check if the store and the interface file are known to disagree
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            Error::PartialAdd { .. }
                | Error::PartialDelete { .. }
                | Error::PartialInit { .. }
                | Error::HostAlreadyProvisioned
        )
    }

    /// Check if the operation was refused before anything was changed
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Error::InvalidPeer(_)
                | Error::ReservedName(_)
                | Error::PeerAlreadyExists(_)
                | Error::PeerNotFound(_)
                | Error::HostNotProvisioned
                | Error::HostConfigExists(_)
                | Error::AlreadyInitialized(_)
        )
    }

    /// Check if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_) | Error::ConfigParse(_))
    }
}
