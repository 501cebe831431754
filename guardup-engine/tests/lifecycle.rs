//! End-to-end peer lifecycle tests
//!
//! Every test runs against an in-memory store and a temporary directory
//! standing in for both `/var/guardup` and `/etc/wireguard`.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use guardup_engine::keygen::public_key_for;
use guardup_engine::{
    Error, ExportKind, ExportOutput, HostSettings, InterfaceFile, KeyGenerator, Keypair,
    PeerManager, PeerStore, ProvisioningEncoder, SqliteStore, TemplateSet, X25519KeyGenerator,
    TemplateKind, HOST_PEER_NAME,
};
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    canonical: PathBuf,
    manager: PeerManager<SqliteStore>,
}

fn settings() -> HostSettings {
    HostSettings {
        internal_address: "10.0.0.1".parse().unwrap(),
        network_prefix: 24,
        external_address: "192.168.1.10".to_string(),
        listen_port: 51820,
        interface: "eth0".to_string(),
        wg_interface: "wg0".to_string(),
        dns_server: "1.0.0.1".to_string(),
        client_allowed_ips: "0.0.0.0/0".to_string(),
    }
}

fn harness_with(keygen: Box<dyn KeyGenerator>) -> Harness {
    build_harness(keygen, TemplateSet::builtin(), |root| {
        let system_dir = root.join("wireguard");
        fs::create_dir_all(&system_dir).unwrap();
        system_dir.join("wg0.conf")
    })
}

/// `canonical` receives the temporary root and returns the link location
fn build_harness(
    keygen: Box<dyn KeyGenerator>,
    templates: TemplateSet,
    canonical: impl FnOnce(&Path) -> PathBuf,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let state_dir = tmp.path().join("guardup");
    fs::create_dir_all(&state_dir).unwrap();

    let canonical = canonical(tmp.path());
    let manager = PeerManager::new(
        settings(),
        SqliteStore::open_in_memory().unwrap(),
        keygen,
        templates,
        InterfaceFile::new(state_dir.join("wg0.conf")),
        canonical.clone(),
    );

    Harness {
        _tmp: tmp,
        canonical,
        manager,
    }
}

fn harness() -> Harness {
    harness_with(Box::new(X25519KeyGenerator))
}

fn initialized() -> Harness {
    let mut h = harness();
    h.manager.initialize_host().unwrap();
    h
}

fn file_content(h: &Harness) -> String {
    h.manager.interface().read().unwrap()
}

fn sentinel_count(h: &Harness, name: &str) -> usize {
    h.manager
        .interface()
        .peer_names()
        .unwrap()
        .iter()
        .filter(|n| n.as_str() == name)
        .count()
}

fn listed_names(h: &Harness) -> Vec<String> {
    h.manager
        .list()
        .unwrap()
        .into_iter()
        .filter(|p| !p.is_host())
        .map(|p| p.name)
        .collect()
}

fn state_files(manager: &PeerManager<SqliteStore>) -> Vec<std::ffi::OsString> {
    let dir = manager.interface().path().parent().unwrap();
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    names.sort();
    names
}

struct FailingKeys;

impl KeyGenerator for FailingKeys {
    fn generate_keypair(&self) -> guardup_engine::Result<Keypair> {
        Err(Error::KeygenFailed("wg is not installed".into()))
    }
}

#[derive(Clone, Default)]
struct RecordingEncoder {
    seen: Rc<RefCell<Vec<String>>>,
}

impl ProvisioningEncoder for RecordingEncoder {
    fn encode(&self, text: &str) -> guardup_engine::Result<()> {
        self.seen.borrow_mut().push(text.to_string());
        Ok(())
    }
}

#[test]
fn test_initialize_host_creates_single_host_block() {
    let mut h = harness();
    let host = h.manager.initialize_host().unwrap();

    assert_eq!(host.name, HOST_PEER_NAME);
    assert_eq!(host.address, "10.0.0.1");
    assert_eq!(host.allowed_ips, "192.168.1.10");

    let content = file_content(&h);
    assert!(content.starts_with("[Interface]\n"));
    assert!(content.contains("Address = 10.0.0.1/24\n"));
    assert!(content.contains("ListenPort = 51820\n"));
    assert!(h.manager.interface().peer_names().unwrap().is_empty());
    assert!(!content.lines().any(|l| l.starts_with('#')));

    let private_key = content
        .lines()
        .find_map(|l| l.strip_prefix("PrivateKey = "))
        .unwrap();
    assert_eq!(public_key_for(private_key).unwrap(), host.public_key);

    assert_eq!(fs::read_to_string(&h.canonical).unwrap(), content);
}

#[test]
fn test_initialize_host_twice_fails_without_changes() {
    let mut h = initialized();
    let before = fs::read(h.manager.interface().path()).unwrap();
    let host_before = h.manager.store().find_by_name(HOST_PEER_NAME).unwrap();

    let err = h.manager.initialize_host().unwrap_err();
    assert!(matches!(err, Error::HostConfigExists(ref p) if *p == h.canonical));
    assert!(err.is_guard());

    assert_eq!(fs::read(h.manager.interface().path()).unwrap(), before);
    assert_eq!(
        h.manager.store().find_by_name(HOST_PEER_NAME).unwrap(),
        host_before
    );
}

#[test]
fn test_initialize_host_with_leftover_record() {
    let mut h = initialized();
    fs::remove_file(&h.canonical).unwrap();

    let err = h.manager.initialize_host().unwrap_err();
    assert!(matches!(err, Error::HostAlreadyProvisioned));
    assert!(err.is_divergence());
    assert!(!h.canonical.exists());
}

#[test]
#[cfg(unix)]
fn test_initialize_host_when_link_location_cannot_be_checked() {
    // A regular file where the system directory should be
    let mut h = build_harness(Box::new(X25519KeyGenerator), TemplateSet::builtin(), |root| {
        let blocked = root.join("wireguard");
        fs::write(&blocked, "").unwrap();
        blocked.join("wg0.conf")
    });

    let err = h.manager.initialize_host().unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(!err.is_divergence());

    assert!(h.manager.list().unwrap().is_empty());
    assert!(!h.manager.interface().exists());
}

#[test]
fn test_partial_init_then_repair() {
    let mut h = build_harness(Box::new(X25519KeyGenerator), TemplateSet::builtin(), |root| {
        root.join("wireguard").join("wg0.conf")
    });

    let err = h.manager.initialize_host().unwrap_err();
    assert!(err.is_divergence());
    assert!(matches!(err, Error::PartialInit { .. }));

    let host = h.manager.store().find_by_name(HOST_PEER_NAME).unwrap();
    assert!(fs::symlink_metadata(&h.canonical).is_err());

    assert!(matches!(
        h.manager.initialize_host(),
        Err(Error::HostAlreadyProvisioned)
    ));

    fs::create_dir_all(h.canonical.parent().unwrap()).unwrap();
    assert_eq!(h.manager.repair().unwrap(), 0);

    let content = fs::read_to_string(&h.canonical).unwrap();
    assert_eq!(content, file_content(&h));
    let private_key = content
        .lines()
        .find_map(|l| l.strip_prefix("PrivateKey = "))
        .unwrap();
    assert_eq!(public_key_for(private_key).unwrap(), host.public_key);

    assert!(matches!(
        h.manager.initialize_host(),
        Err(Error::HostConfigExists(_))
    ));
    h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();
    assert!(h.manager.audit().unwrap().is_consistent());
}

#[test]
fn test_host_template_error_aborts_before_mutation() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join(TemplateKind::Host.file_name()),
        "[Interface]\nPrivateKey = {HOST_PRIVATE_KEY}\nMTU = {HOST_MTU}\n",
    )
    .unwrap();
    for kind in [TemplateKind::Peer, TemplateKind::Client] {
        fs::write(dir.path().join(kind.file_name()), kind.builtin()).unwrap();
    }
    let templates = TemplateSet::load_dir(dir.path()).unwrap();

    let mut h = build_harness(Box::new(X25519KeyGenerator), templates, |root| {
        let system_dir = root.join("wireguard");
        fs::create_dir_all(&system_dir).unwrap();
        system_dir.join("wg0.conf")
    });

    let err = h.manager.initialize_host().unwrap_err();
    assert!(matches!(err, Error::MissingPlaceholder(ref name) if name == "HOST_MTU"));

    assert!(h.manager.list().unwrap().is_empty());
    assert!(!h.manager.interface().exists());
    assert!(fs::symlink_metadata(&h.canonical).is_err());
}

#[test]
fn test_add_before_host_initialized() {
    let mut h = harness();

    let err = h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap_err();
    assert!(matches!(err, Error::HostNotProvisioned));
    assert!(h.manager.list().unwrap().is_empty());
    assert!(!h.manager.interface().exists());
}

#[test]
fn test_add_then_list_and_file() {
    let mut h = initialized();

    let alice = h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();
    assert_eq!(alice.address, "10.0.0.2");
    assert_eq!(alice.allowed_ips, "10.0.0.2/32");

    assert_eq!(listed_names(&h), vec!["alice"]);
    assert_eq!(sentinel_count(&h, "alice"), 1);

    let content = file_content(&h);
    assert!(content.contains(&format!(
        "[Peer] # alice\nPublicKey = {}\nAllowedIPs = 10.0.0.2/32\n# end-peer alice\n",
        alice.public_key
    )));
    assert!(!content.contains(&alice.private_key));
}

#[test]
fn test_duplicate_add_changes_nothing() {
    let mut h = initialized();
    let alice = h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();
    let before = file_content(&h);

    let err = h.manager.add("alice", "10.0.0.9", "10.0.0.9/32").unwrap_err();
    assert!(matches!(err, Error::PeerAlreadyExists(ref n) if n == "alice"));

    let records = h.manager.list().unwrap();
    let stored: Vec<_> = records.iter().filter(|p| p.name == "alice").collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(*stored[0], alice);

    assert_eq!(sentinel_count(&h, "alice"), 1);
    assert_eq!(file_content(&h), before);
}

#[test]
fn test_add_reserved_or_invalid_peer() {
    let mut h = initialized();
    let before = file_content(&h);

    assert!(matches!(
        h.manager.add(HOST_PEER_NAME, "10.0.0.2", "10.0.0.2/32"),
        Err(Error::ReservedName(_))
    ));
    assert!(matches!(
        h.manager.add("alice", "not-an-ip", "10.0.0.2/32"),
        Err(Error::InvalidPeer(_))
    ));

    assert!(listed_names(&h).is_empty());
    assert_eq!(file_content(&h), before);
}

#[test]
fn test_keygen_failure_aborts_before_mutation() {
    let mut h = harness_with(Box::new(FailingKeys));

    assert!(matches!(
        h.manager.initialize_host(),
        Err(Error::KeygenFailed(_))
    ));
    assert!(h.manager.list().unwrap().is_empty());
    assert!(!h.manager.interface().exists());
    assert!(fs::symlink_metadata(&h.canonical).is_err());
}

#[test]
fn test_delete_removes_record_and_block() {
    let mut h = initialized();
    let host_only = file_content(&h);

    h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();
    h.manager.delete("alice").unwrap();

    assert!(listed_names(&h).is_empty());
    assert_eq!(sentinel_count(&h, "alice"), 0);
    assert_eq!(file_content(&h), host_only);
}

#[test]
fn test_delete_unknown_peer() {
    let mut h = initialized();
    h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();
    let before = file_content(&h);

    let err = h.manager.delete("bob").unwrap_err();
    assert!(matches!(err, Error::PeerNotFound(ref n) if n == "bob"));
    assert_eq!(listed_names(&h), vec!["alice"]);
    assert_eq!(file_content(&h), before);
}

#[test]
fn test_delete_host_rejected() {
    let mut h = initialized();
    assert!(matches!(
        h.manager.delete(HOST_PEER_NAME),
        Err(Error::ReservedName(_))
    ));
    assert!(h.manager.store().find_by_name(HOST_PEER_NAME).is_ok());
}

#[test]
fn test_insertion_order_is_preserved() {
    let mut h = initialized();
    for (i, name) in ["carol", "alice", "bob"].iter().enumerate() {
        let address = format!("10.0.0.{}", i + 2);
        h.manager
            .add(name, &address, &format!("{}/32", address))
            .unwrap();
    }

    assert_eq!(listed_names(&h), vec!["carol", "alice", "bob"]);
    assert_eq!(
        h.manager.interface().peer_names().unwrap(),
        vec!["carol", "alice", "bob"]
    );

    h.manager.delete("alice").unwrap();
    h.manager.add("dave", "10.0.0.9", "10.0.0.9/32").unwrap();
    assert_eq!(listed_names(&h), vec!["carol", "bob", "dave"]);
    assert_eq!(
        h.manager.interface().peer_names().unwrap(),
        vec!["carol", "bob", "dave"]
    );
}

#[test]
fn test_export_text_uses_current_records() {
    let mut h = initialized();
    let alice = h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();
    let host = h.manager.store().find_by_name(HOST_PEER_NAME).unwrap();

    let text = match h.manager.export("alice", ExportKind::Text).unwrap() {
        ExportOutput::Text(text) => text,
        other => panic!("unexpected export output: {:?}", other),
    };

    assert!(text.contains(&format!("PrivateKey = {}\n", alice.private_key)));
    assert!(text.contains(&format!("PublicKey = {}\n", host.public_key)));
    assert!(text.contains("Address = 10.0.0.2\n"));
    assert!(text.contains("DNS = 1.0.0.1\n"));
    assert!(text.contains("Endpoint = 192.168.1.10:51820\n"));
    assert!(text.starts_with("# WireGuard client configuration for alice\n"));
}

#[test]
fn test_export_unknown_peer() {
    let h = initialized();
    assert!(matches!(
        h.manager.export("ghost", ExportKind::Text),
        Err(Error::PeerNotFound(_))
    ));
}

#[test]
fn test_export_provisioning() {
    let encoder = RecordingEncoder::default();
    let seen = encoder.seen.clone();

    let h = initialized();
    let Harness {
        _tmp,
        canonical: _,
        manager,
    } = h;
    let mut manager = manager.with_encoder(Box::new(encoder));
    manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();

    let files_before = state_files(&manager);

    assert_eq!(
        manager.export("alice", ExportKind::Provisioning).unwrap(),
        ExportOutput::Provisioned
    );

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], manager.client_config("alice").unwrap());

    let files_after = state_files(&manager);
    assert_eq!(files_before, files_after);
}

#[test]
fn test_export_provisioning_without_encoder() {
    let mut h = initialized();
    h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();

    assert!(matches!(
        h.manager.export("alice", ExportKind::Provisioning),
        Err(Error::EncodingUnavailable(_))
    ));
}

#[test]
fn test_partial_add_when_file_write_fails() {
    let mut h = initialized();
    fs::remove_file(h.manager.interface().path()).unwrap();

    let err = h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap_err();
    assert!(err.is_divergence());
    match err {
        Error::PartialAdd { name, source } => {
            assert_eq!(name, "alice");
            assert!(matches!(*source, Error::ConfigNotInitialized(_)));
        }
        other => panic!("expected PartialAdd, got {:?}", other),
    }

    assert_eq!(listed_names(&h), vec!["alice"]);
    assert!(!h.manager.interface().exists());
}

#[test]
fn test_partial_delete_when_block_missing() {
    let mut h = initialized();
    h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();
    h.manager.interface().remove_peer_block("alice").unwrap();

    let err = h.manager.delete("alice").unwrap_err();
    assert!(err.is_divergence());
    match err {
        Error::PartialDelete { name, source } => {
            assert_eq!(name, "alice");
            assert!(matches!(*source, Error::PeerBlockNotFound(_)));
        }
        other => panic!("expected PartialDelete, got {:?}", other),
    }

    assert!(listed_names(&h).is_empty());
}

#[test]
fn test_audit_and_repair() {
    let mut h = initialized();
    h.manager.add("alice", "10.0.0.2", "10.0.0.2/32").unwrap();
    h.manager.add("bob", "10.0.0.3", "10.0.0.3/32").unwrap();
    let healthy = file_content(&h);
    assert!(h.manager.audit().unwrap().is_consistent());

    let interface = h.manager.interface();
    interface.remove_peer_block("alice").unwrap();
    interface
        .append_peer_block("eve", "PublicKey = eve\nAllowedIPs = 10.0.0.66/32\n")
        .unwrap();
    interface
        .append_peer_block("bob", "PublicKey = bob\nAllowedIPs = 10.0.0.3/32\n")
        .unwrap();

    let report = h.manager.audit().unwrap();
    assert_eq!(report.missing_blocks, vec!["alice"]);
    assert_eq!(report.orphan_blocks, vec!["eve"]);
    assert_eq!(report.duplicate_blocks, vec!["bob"]);

    assert_eq!(h.manager.repair().unwrap(), 2);
    assert!(h.manager.audit().unwrap().is_consistent());
    assert_eq!(file_content(&h), healthy);
}

#[test]
fn test_repair_requires_host() {
    let h = harness();
    assert!(matches!(h.manager.repair(), Err(Error::HostNotProvisioned)));
}
