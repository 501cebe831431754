//! Configuration templates
//!
//! Templates are plain WireGuard configuration text with `{NAME}`
//! placeholders. `{{` and `}}` produce literal braces. Rendering either
//! substitutes every placeholder or fails; nothing is defaulted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use guardup_store::PeerRecord;

use crate::config::HostSettings;
use crate::error::{Error, Result};

/// Placeholder name → value
pub type Fields = HashMap<&'static str, String>;

/// Where rendered text ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    /// The host interface file that wg-quick loads; full-line comments are dropped
    HostInterface,
    /// A configuration handed to a client; comments are kept
    ClientExport,
}

/// The three templates guardup renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// `[Interface]` section of the host
    Host,
    /// Attribute lines of one peer block in the host file
    Peer,
    /// Complete client configuration
    Client,
}

impl TemplateKind {
    /// File name looked up in a template override directory
    pub fn file_name(&self) -> &'static str {
        match self {
            TemplateKind::Host => "wg_server.conf",
            TemplateKind::Peer => "wg_peer.conf",
            TemplateKind::Client => "wg_client.conf",
        }
    }

    /// Compiled-in default
    pub fn builtin(&self) -> &'static str {
        match self {
            TemplateKind::Host => include_str!("../templates/wg_server.conf"),
            TemplateKind::Peer => include_str!("../templates/wg_peer.conf"),
            TemplateKind::Client => include_str!("../templates/wg_client.conf"),
        }
    }

    /// Output destination of this template
    pub fn target(&self) -> RenderTarget {
        match self {
            TemplateKind::Host | TemplateKind::Peer => RenderTarget::HostInterface,
            TemplateKind::Client => RenderTarget::ClientExport,
        }
    }
}

/// Loaded template sources
#[derive(Debug, Clone)]
pub struct TemplateSet {
    host: String,
    peer: String,
    client: String,
}

impl TemplateSet {
    /// Compiled-in templates
    pub fn builtin() -> Self {
        Self {
            host: TemplateKind::Host.builtin().to_string(),
            peer: TemplateKind::Peer.builtin().to_string(),
            client: TemplateKind::Client.builtin().to_string(),
        }
    }

    /// Load all three templates from `dir`
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            host: read_template(dir.join(TemplateKind::Host.file_name()))?,
            peer: read_template(dir.join(TemplateKind::Peer.file_name()))?,
            client: read_template(dir.join(TemplateKind::Client.file_name()))?,
        })
    }

    /// Templates from `dir` when set, built-ins otherwise
    pub fn from_dir(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::load_dir(dir),
            None => Ok(Self::builtin()),
        }
    }

    /// Raw source of a template
    pub fn source(&self, kind: TemplateKind) -> &str {
        match kind {
            TemplateKind::Host => &self.host,
            TemplateKind::Peer => &self.peer,
            TemplateKind::Client => &self.client,
        }
    }

    /// Render a template for its destination
    pub fn render(&self, kind: TemplateKind, fields: &Fields) -> Result<String> {
        let text = render(self.source(kind), fields)?;
        Ok(match kind.target() {
            RenderTarget::HostInterface => strip_comments(&text),
            RenderTarget::ClientExport => text,
        })
    }
}

fn read_template(path: PathBuf) -> Result<String> {
    std::fs::read_to_string(&path).map_err(|source| Error::UnreadableTemplate { path, source })
}

/// Substitute every `{NAME}` in `template` with its value from `fields`
pub fn render(template: &str, fields: &Fields) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) if ch.is_ascii_alphanumeric() || ch == '_' => name.push(ch),
                        Some(ch) => {
                            return Err(Error::MalformedTemplate(format!(
                                "unexpected '{}' in placeholder '{{{}'",
                                ch, name
                            )))
                        }
                        None => {
                            return Err(Error::MalformedTemplate(format!(
                                "unterminated placeholder '{{{}'",
                                name
                            )))
                        }
                    }
                }

                if name.is_empty() {
                    return Err(Error::MalformedTemplate("empty placeholder '{}'".into()));
                }

                let value = fields
                    .get(name.as_str())
                    .ok_or_else(|| Error::MissingPlaceholder(name.clone()))?;
                out.push_str(value);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(Error::MalformedTemplate("unmatched '}'".into())),
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Drop lines whose first non-blank character is `#`
pub fn strip_comments(text: &str) -> String {
    text.split_inclusive('\n')
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect()
}

/// Fields for the host `[Interface]` template
pub fn host_fields(settings: &HostSettings, host_private_key: &str) -> Fields {
    Fields::from([
        ("HOST_INTERNAL_IP", settings.internal_address.to_string()),
        ("HOST_NETWORK_PREFIX", settings.network_prefix.to_string()),
        ("HOST_LISTEN_PORT", settings.listen_port.to_string()),
        ("INTERFACE", settings.interface.clone()),
        ("HOST_PRIVATE_KEY", host_private_key.to_string()),
    ])
}

/// Fields for a peer block in the host file
pub fn peer_fields(peer: &PeerRecord, host: &PeerRecord) -> Fields {
    Fields::from([
        ("PEER", peer.name.clone()),
        ("PEER_PUBLIC_KEY", peer.public_key.clone()),
        ("PEER_ADDRESS", peer.address.clone()),
        ("PEER_ALLOWED_IP", peer.allowed_ips.clone()),
        ("HOST_PUBLIC_KEY", host.public_key.clone()),
        ("HOST_INTERNAL_IP", host.address.clone()),
    ])
}

/// Fields for a client configuration export
pub fn client_fields(settings: &HostSettings, peer: &PeerRecord, host: &PeerRecord) -> Fields {
    Fields::from([
        ("PEER", peer.name.clone()),
        ("PEER_PRIVATE_KEY", peer.private_key.clone()),
        ("PEER_ADDRESS", peer.address.clone()),
        ("PEER_ALLOWED_IP", peer.allowed_ips.clone()),
        ("DNS_SERVER", settings.dns_server.clone()),
        ("HOST_PUBLIC_KEY", host.public_key.clone()),
        ("HOST_INTERNAL_IP", host.address.clone()),
        ("HOST_EXTERNAL_IP", settings.external_address.clone()),
        ("HOST_LISTEN_PORT", settings.listen_port.to_string()),
        ("CLIENT_ALLOWED_IPS", settings.client_allowed_ips.clone()),
    ])
}
