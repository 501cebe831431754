//! guardup engine
//!
//! This crate keeps a WireGuard host's peer roster consistent across three
//! places: the credential store, the host interface file that wg-quick
//! loads, and the client configurations handed out to peers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  ┌─────────────────┐                                        │
//! │  │   guardup-cli   │                                        │
//! │  └────────┬────────┘                                        │
//! │           ▼                                                 │
//! │  ┌────────────────────────────────────────────────────────┐ │
//! │  │                   guardup-engine                        │ │
//! │  │  - PeerManager (add / delete / list / export / init)   │ │
//! │  │  - TemplateSet (placeholder rendering)                 │ │
//! │  │  - InterfaceFile (peer blocks in the host file)        │ │
//! │  │  - KeyGenerator / ProvisioningEncoder                  │ │
//! │  └────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Storage Layer                            │
//! │  ┌─────────────────┐                                        │
//! │  │  guardup-store  │  SQLite table of peer records          │
//! │  └─────────────────┘                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod encode;
pub mod error;
pub mod interface;
pub mod keygen;
pub mod manager;
pub mod template;

pub use config::{Config, HostSettings, KeygenBackend};
pub use encode::{ProvisioningEncoder, QrencodeEncoder};
pub use error::{Error, Result};
pub use interface::InterfaceFile;
pub use keygen::{KeyGenerator, Keypair, WgKeyGenerator, X25519KeyGenerator};
pub use manager::{DivergenceReport, ExportKind, ExportOutput, PeerManager};
pub use template::{RenderTarget, TemplateKind, TemplateSet};

pub use guardup_store::{PeerRecord, PeerStore, SqliteStore, HOST_PEER_NAME};
