//! Peer lifecycle coordination
//!
//! [`PeerManager`] keeps the credential store and the interface file in
//! step. Every operation runs its steps in a fixed order so that a failure
//! either changes nothing or leaves one of the named divergence states
//! ([`Error::PartialAdd`], [`Error::PartialDelete`], [`Error::PartialInit`]).
//! Divergence is reported, never repaired automatically; [`PeerManager::audit`]
//! and [`PeerManager::repair`] exist for the operator.

use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use guardup_store::{NewPeer, PeerRecord, PeerStore, SqliteStore, HOST_PEER_NAME};

use crate::config::{parse_cidr_list, Config, HostSettings};
use crate::encode::{ProvisioningEncoder, QrencodeEncoder};
use crate::error::{Error, Result};
use crate::interface::{self, InterfaceFile};
use crate::keygen::{self, KeyGenerator};
use crate::template::{self, TemplateKind, TemplateSet};

/// How a client configuration is handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Plain text for copy and paste
    Text,
    /// Passed to the provisioning encoder (QR code)
    Provisioning,
}

/// Result of an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutput {
    /// Rendered client configuration
    Text(String),
    /// The encoder has presented the configuration
    Provisioned,
}

/// Differences between the store and the interface file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DivergenceReport {
    /// Peers in the store without a block in the file
    pub missing_blocks: Vec<String>,
    /// Blocks in the file without a peer in the store
    pub orphan_blocks: Vec<String>,
    /// Peers with more than one block in the file
    pub duplicate_blocks: Vec<String>,
}

impl DivergenceReport {
    /// True when store and file agree
    pub fn is_consistent(&self) -> bool {
        self.missing_blocks.is_empty()
            && self.orphan_blocks.is_empty()
            && self.duplicate_blocks.is_empty()
    }
}

/// Coordinates the credential store, templates and the interface file
pub struct PeerManager<S: PeerStore> {
    settings: HostSettings,
    store: S,
    keygen: Box<dyn KeyGenerator>,
    templates: TemplateSet,
    interface: InterfaceFile,
    canonical_path: PathBuf,
    encoder: Option<Box<dyn ProvisioningEncoder>>,
}

impl PeerManager<SqliteStore> {
    /// Build a manager from a loaded configuration.
    ///
    /// Creates the state directory if needed and opens the SQLite store.
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.paths.state_dir)?;

        let store = SqliteStore::open(config.database_path())?;
        let templates = TemplateSet::from_dir(config.paths.template_dir.as_deref())?;

        Ok(Self::new(
            config.host.clone(),
            store,
            keygen::from_config(config),
            templates,
            InterfaceFile::new(config.interface_file_path()),
            config.canonical_config_path(),
        )
        .with_encoder(Box::new(QrencodeEncoder::new(config.tools.qrencode.clone()))))
    }
}

impl<S: PeerStore> PeerManager<S> {
    /// Create a manager without a provisioning encoder
    pub fn new(
        settings: HostSettings,
        store: S,
        keygen: Box<dyn KeyGenerator>,
        templates: TemplateSet,
        interface: InterfaceFile,
        canonical_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            store,
            keygen,
            templates,
            interface,
            canonical_path: canonical_path.into(),
            encoder: None,
        }
    }

    /// Attach a provisioning encoder
    pub fn with_encoder(mut self, encoder: Box<dyn ProvisioningEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Host settings this manager renders with
    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// The credential store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The managed interface file
    pub fn interface(&self) -> &InterfaceFile {
        &self.interface
    }

    /// Location wg-quick reads the configuration from
    pub fn canonical_path(&self) -> &Path {
        &self.canonical_path
    }

    /// Create the host record and the interface file.
    ///
    /// Refuses to run if anything exists at the canonical location, or if
    /// the location cannot be inspected. Key material generated here cannot
    /// be recovered, so nothing is retried.
    pub fn initialize_host(&mut self) -> Result<PeerRecord> {
        if interface::path_occupied(&self.canonical_path)? {
            return Err(Error::HostConfigExists(self.canonical_path.clone()));
        }

        let keys = self.keygen.generate_keypair()?;
        let host_block = self.templates.render(
            TemplateKind::Host,
            &template::host_fields(&self.settings, &keys.private_key),
        )?;

        let host = NewPeer {
            name: HOST_PEER_NAME.to_string(),
            address: self.settings.internal_address.to_string(),
            public_key: keys.public_key.clone(),
            private_key: keys.private_key.to_string(),
            allowed_ips: self.settings.external_address.clone(),
        };

        match self.store.insert(&host) {
            Ok(_) => {}
            Err(guardup_store::Error::DuplicateName(_)) => {
                log::warn!("Host record exists but {:?} does not", self.canonical_path);
                return Err(Error::HostAlreadyProvisioned);
            }
            Err(e) => return Err(e.into()),
        }

        let initialized = self
            .interface
            .initialize_host_block(&host_block, &self.canonical_path)
            .map_err(|e| match e {
                Error::AlreadyInitialized(path) => Error::HostConfigExists(path),
                other => other,
            })
            .and_then(|_| self.host_record());

        initialized.map_err(|source| {
            log::warn!("Host record stored but interface file not created: {}", source);
            Error::PartialInit {
                source: Box::new(source),
            }
        })
    }

    /// Add a peer: generate keys, store the record, append its block.
    pub fn add(&mut self, name: &str, address: &str, allowed_ips: &str) -> Result<PeerRecord> {
        validate_peer(name, address, allowed_ips)?;
        self.host_record()?;

        let keys = self.keygen.generate_keypair()?;
        let peer = NewPeer {
            name: name.to_string(),
            address: address.trim().to_string(),
            public_key: keys.public_key.clone(),
            private_key: keys.private_key.to_string(),
            allowed_ips: allowed_ips.trim().to_string(),
        };

        match self.store.insert(&peer) {
            Ok(_) => {}
            Err(guardup_store::Error::DuplicateName(_)) => {
                return Err(Error::PeerAlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        self.append_block(name).map_err(|source| {
            log::warn!("Peer '{}' stored but its block was not written: {}", name, source);
            Error::PartialAdd {
                name: name.to_string(),
                source: Box::new(source),
            }
        })
    }

    fn append_block(&self, name: &str) -> Result<PeerRecord> {
        let peer = self.store.find_by_name(name)?;
        let host = self.host_record()?;

        let body = self
            .templates
            .render(TemplateKind::Peer, &template::peer_fields(&peer, &host))?;
        self.interface.append_peer_block(name, &body)?;

        Ok(peer)
    }

    /// Delete a peer from the store, then remove its block
    pub fn delete(&mut self, name: &str) -> Result<()> {
        if name == HOST_PEER_NAME {
            return Err(Error::ReservedName(name.to_string()));
        }

        match self.store.delete_by_name(name) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Err(Error::PeerNotFound(name.to_string())),
            Err(e) => return Err(e.into()),
        }

        self.interface.remove_peer_block(name).map_err(|source| {
            log::warn!("Peer '{}' deleted but its block was not removed: {}", name, source);
            Error::PartialDelete {
                name: name.to_string(),
                source: Box::new(source),
            }
        })
    }

    /// All records, host included, in insertion order
    pub fn list(&self) -> Result<Vec<PeerRecord>> {
        Ok(self.store.list_all()?)
    }

    /// Render the client configuration of `name` with the current host record
    pub fn client_config(&self, name: &str) -> Result<String> {
        if name == HOST_PEER_NAME {
            return Err(Error::ReservedName(name.to_string()));
        }

        let peer = self.peer_record(name)?;
        let host = self.host_record()?;

        self.templates.render(
            TemplateKind::Client,
            &template::client_fields(&self.settings, &peer, &host),
        )
    }

    /// Export the client configuration of `name`
    pub fn export(&self, name: &str, kind: ExportKind) -> Result<ExportOutput> {
        match kind {
            ExportKind::Text => Ok(ExportOutput::Text(self.client_config(name)?)),
            ExportKind::Provisioning => {
                let encoder = self
                    .encoder
                    .as_ref()
                    .ok_or_else(|| Error::EncodingUnavailable("no encoder configured".into()))?;

                let text = zeroize::Zeroizing::new(self.client_config(name)?);
                encoder.encode(&text)?;

                log::info!("Provisioned client configuration for '{}'", name);
                Ok(ExportOutput::Provisioned)
            }
        }
    }

    /// Compare the store with the interface file
    pub fn audit(&self) -> Result<DivergenceReport> {
        let stored: Vec<String> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|p| !p.is_host())
            .map(|p| p.name)
            .collect();
        let in_file = self.interface.peer_names()?;

        let stored_set: HashSet<&str> = stored.iter().map(String::as_str).collect();
        let file_set: HashSet<&str> = in_file.iter().map(String::as_str).collect();

        let mut report = DivergenceReport {
            missing_blocks: stored
                .iter()
                .filter(|name| !file_set.contains(name.as_str()))
                .cloned()
                .collect(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for name in &in_file {
            if !seen.insert(name.as_str()) {
                if !report.duplicate_blocks.contains(name) {
                    report.duplicate_blocks.push(name.clone());
                }
            } else if !stored_set.contains(name.as_str()) {
                report.orphan_blocks.push(name.clone());
            }
        }

        Ok(report)
    }

    /// Rebuild the interface file from the store.
    ///
    /// Also restores the canonical link if it is missing, which recovers
    /// from an interrupted host initialization. Returns the number of peer
    /// blocks written.
    pub fn repair(&self) -> Result<usize> {
        let host = self.host_record()?;
        let host_block = self.templates.render(
            TemplateKind::Host,
            &template::host_fields(&self.settings, &host.private_key),
        )?;

        let peers: Vec<PeerRecord> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|p| !p.is_host())
            .collect();

        let mut blocks = Vec::with_capacity(peers.len());
        for peer in &peers {
            let body = self
                .templates
                .render(TemplateKind::Peer, &template::peer_fields(peer, &host))?;
            blocks.push((peer.name.as_str(), body));
        }

        let count = blocks.len();
        self.interface.rewrite(&host_block, blocks)?;

        if self.interface.ensure_link(&self.canonical_path)? {
            log::warn!("Restored missing link {:?}", self.canonical_path);
        }

        log::info!("Rebuilt {:?} with {} peer blocks", self.interface.path(), count);
        Ok(count)
    }

    fn host_record(&self) -> Result<PeerRecord> {
        self.store.find_by_name(HOST_PEER_NAME).map_err(|e| {
            if e.is_not_found() {
                Error::HostNotProvisioned
            } else {
                e.into()
            }
        })
    }

    fn peer_record(&self, name: &str) -> Result<PeerRecord> {
        self.store.find_by_name(name).map_err(|e| {
            if e.is_not_found() {
                Error::PeerNotFound(name.to_string())
            } else {
                e.into()
            }
        })
    }
}

/// Check a peer's name, address and subnets before anything is generated
pub fn validate_peer(name: &str, address: &str, allowed_ips: &str) -> Result<()> {
    if name.is_empty() || name.trim() != name {
        return Err(Error::InvalidPeer(format!(
            "name '{}' must be non-empty without surrounding whitespace",
            name
        )));
    }
    if name
        .chars()
        .any(|c| c.is_control() || matches!(c, '#' | '[' | ']'))
    {
        return Err(Error::InvalidPeer(format!(
            "name '{}' contains a reserved character",
            name.escape_debug()
        )));
    }
    if name == HOST_PEER_NAME {
        return Err(Error::ReservedName(name.to_string()));
    }

    address
        .trim()
        .parse::<IpAddr>()
        .map_err(|e| Error::InvalidPeer(format!("address '{}': {}", address, e)))?;

    parse_cidr_list(allowed_ips)
        .map_err(|e| Error::InvalidPeer(format!("allowed subnets: {}", e)))?;

    Ok(())
}
