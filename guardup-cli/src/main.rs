//! guardup CLI
//!
//! A command-line interface for provisioning a WireGuard host and managing
//! its peers.

mod status;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use guardup_engine::{Config, ExportKind, ExportOutput, PeerManager, PeerRecord, SqliteStore};

use crate::status::HostStatus;

/// Characters of a key shown by `peer list`
const KEY_PREVIEW_LEN: usize = 15;

/// guardup - WireGuard host and peer management
#[derive(Parser)]
#[command(name = "guardup")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/var/guardup/guardup.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "guardup.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check WireGuard tools, existing configuration and IP forwarding
    Status,

    /// Manage the host endpoint
    Host {
        #[command(subcommand)]
        action: HostAction,
    },

    /// Manage peers
    Peer {
        #[command(subcommand)]
        action: PeerAction,
    },

    /// Compare the credential store with the interface file
    Audit,

    /// Rebuild the interface file from the credential store
    Repair,
}

#[derive(Subcommand)]
enum HostAction {
    /// Generate host keys and create the interface file
    Init,
}

#[derive(Subcommand)]
enum PeerAction {
    /// List all records, host included
    List,

    /// Add a peer
    Add {
        /// Unique peer name
        name: String,

        /// Address of the peer inside the VPN
        #[arg(short, long)]
        address: String,

        /// Comma-separated subnets the peer may route
        #[arg(long)]
        allowed: String,
    },

    /// Delete a peer
    Delete {
        /// Peer name
        name: String,
    },

    /// Print a peer's client configuration
    Export {
        /// Peer name
        name: String,

        /// Show a QR code instead of text
        #[arg(long)]
        qr: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::GenConfig { output, force } => generate_config(&output, force),
        Commands::Status => {
            let config = load_config(&cli.config)?;
            HostStatus::inspect(&config).print();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Host { action: HostAction::Init } => init_host(&cli.config),
        Commands::Peer { action } => run_peer(&cli.config, action),
        Commands::Audit => audit(&cli.config),
        Commands::Repair => repair(&cli.config),
    }
}

/// Map a failure to the process exit status
///
/// 1 for generic failures, 2 when validation refused the operation and 3
/// when the store and the interface file no longer agree.
fn exit_status(err: &anyhow::Error) -> u8 {
    let engine_error = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<guardup_engine::Error>());

    match engine_error {
        Some(e) if e.is_divergence() => {
            eprintln!("The credential store and the interface file have diverged.");
            eprintln!("Run `guardup audit` to inspect and `guardup repair` to rebuild.");
            3
        }
        Some(e) if e.is_guard() || e.is_config_error() => 2,
        _ => 1,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))
}

fn open_manager(config_path: &Path) -> Result<PeerManager<SqliteStore>> {
    let config = load_config(config_path)?;
    info!("Configuration loaded from {:?}", config_path);

    PeerManager::open(&config).with_context(|| {
        format!(
            "Failed to open credential store {:?}",
            config.database_path()
        )
    })
}

fn generate_config(output: &Path, force: bool) -> Result<ExitCode> {
    if output.exists() && !force {
        bail!("{:?} already exists; pass --force to overwrite it", output);
    }

    std::fs::write(output, Config::sample())
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nEdit the [host] section before running `guardup host init`.");

    Ok(ExitCode::SUCCESS)
}

fn init_host(config_path: &Path) -> Result<ExitCode> {
    let mut manager = open_manager(config_path)?;
    let host = manager.initialize_host()?;

    println!("Host initialized.");
    println!("  Address:    {}", host.address);
    println!("  Public key: {}", host.public_key);
    println!("  Config:     {}", manager.interface().path().display());
    println!("  Linked at:  {}", manager.canonical_path().display());

    Ok(ExitCode::SUCCESS)
}

fn run_peer(config_path: &Path, action: PeerAction) -> Result<ExitCode> {
    let mut manager = open_manager(config_path)?;

    match action {
        PeerAction::List => print_peers(&manager.list()?),
        PeerAction::Add {
            name,
            address,
            allowed,
        } => {
            let peer = manager
                .add(&name, &address, &allowed)
                .with_context(|| format!("Failed to add peer '{}'", name))?;
            println!("Added peer '{}' ({}).", peer.name, peer.address);
        }
        PeerAction::Delete { name } => {
            manager
                .delete(&name)
                .with_context(|| format!("Failed to delete peer '{}'", name))?;
            println!("Deleted peer '{}'.", name);
        }
        PeerAction::Export { name, qr } => {
            let kind = if qr {
                ExportKind::Provisioning
            } else {
                ExportKind::Text
            };

            match manager.export(&name, kind)? {
                ExportOutput::Text(text) => {
                    println!("----------------- copy below -----------------");
                    print!("{}", text);
                    println!("----------------- copy above -----------------");
                }
                ExportOutput::Provisioned => {}
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_peers(peers: &[PeerRecord]) {
    if peers.is_empty() {
        println!("No peers. Run `guardup host init` first.");
        return;
    }

    let name_width = peers
        .iter()
        .map(|p| p.name.len())
        .chain(std::iter::once(4))
        .max()
        .unwrap_or(4);
    let address_width = peers
        .iter()
        .map(|p| p.address.len())
        .chain(std::iter::once(7))
        .max()
        .unwrap_or(7);
    let allowed_width = peers
        .iter()
        .map(|p| p.allowed_ips.len())
        .chain(std::iter::once(11))
        .max()
        .unwrap_or(11);

    println!(
        "{:>4}  {:<nw$}  {:<aw$}  {:<lw$}  {:<kw$}  {:<kw$}",
        "ID",
        "NAME",
        "ADDRESS",
        "ALLOWED IPS",
        "PUBLIC KEY",
        "PRIVATE KEY",
        nw = name_width,
        aw = address_width,
        lw = allowed_width,
        kw = KEY_PREVIEW_LEN + 3,
    );
    for peer in peers {
        println!(
            "{:>4}  {:<nw$}  {:<aw$}  {:<lw$}  {:<kw$}  {:<kw$}",
            peer.id,
            peer.name,
            peer.address,
            peer.allowed_ips,
            key_preview(&peer.public_key),
            key_preview(&peer.private_key),
            nw = name_width,
            aw = address_width,
            lw = allowed_width,
            kw = KEY_PREVIEW_LEN + 3,
        );
    }
}

fn key_preview(key: &str) -> String {
    let mut preview: String = key.chars().take(KEY_PREVIEW_LEN).collect();
    if key.chars().count() > KEY_PREVIEW_LEN {
        preview.push_str("...");
    }
    preview
}

fn audit(config_path: &Path) -> Result<ExitCode> {
    let manager = open_manager(config_path)?;
    let report = manager.audit()?;

    if report.is_consistent() {
        println!("Credential store and {:?} agree.", manager.interface().path());
        return Ok(ExitCode::SUCCESS);
    }

    for name in &report.missing_blocks {
        println!("  missing block:   {}", name);
    }
    for name in &report.orphan_blocks {
        println!("  orphan block:    {}", name);
    }
    for name in &report.duplicate_blocks {
        println!("  duplicate block: {}", name);
    }
    warn!("Divergence found in {:?}", manager.interface().path());
    println!("\nRun `guardup repair` to rebuild the file from the store.");

    Ok(ExitCode::from(3))
}

fn repair(config_path: &Path) -> Result<ExitCode> {
    let manager = open_manager(config_path)?;
    let count = manager.repair()?;

    println!(
        "Rebuilt {:?} with {} peer block(s).",
        manager.interface().path(),
        count
    );
    println!(
        "Restart the interface to apply: wg-quick down {0} && wg-quick up {0}",
        manager.settings().wg_interface
    );

    Ok(ExitCode::SUCCESS)
}
