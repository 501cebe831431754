//! Host readiness checks for `guardup status`
//!
//! Reports whether the WireGuard tools are installed, whether wg-quick
//! already has a configuration for the interface, and whether the kernel
//! forwards IPv4 traffic.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use guardup_engine::Config;

/// Kernel switch for IPv4 forwarding
const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

/// Result of the readiness checks
#[derive(Debug)]
pub struct HostStatus {
    /// Each required tool and where it was found
    pub tools: Vec<(String, Option<PathBuf>)>,
    /// Canonical wg-quick configuration path
    pub canonical_config: PathBuf,
    /// Whether anything exists at the canonical path
    pub canonical_config_exists: bool,
    /// `net.ipv4.ip_forward`, if readable
    pub ip_forward: Option<bool>,
}

impl HostStatus {
    /// Run all checks for the given configuration
    pub fn inspect(config: &Config) -> Self {
        let tools = ["wg-quick", config.tools.wg.as_str(), config.tools.qrencode.as_str()]
            .iter()
            .map(|tool| (tool.to_string(), locate(tool)))
            .collect();

        let canonical_config = config.canonical_config_path();
        let canonical_config_exists = fs::symlink_metadata(&canonical_config).is_ok();

        Self {
            tools,
            canonical_config,
            canonical_config_exists,
            ip_forward: read_ip_forward(Path::new(IP_FORWARD_PATH)),
        }
    }

    /// Print the report
    pub fn print(&self) {
        for (tool, location) in &self.tools {
            match location {
                Some(path) => println!("  [ok]   {} found at {}", tool, path.display()),
                None => println!("  [warn] {} is not in PATH", tool),
            }
        }

        if self.canonical_config_exists {
            println!(
                "  [warn] {} exists; `guardup host init` will refuse to run",
                self.canonical_config.display()
            );
        } else {
            println!("  [ok]   {} does not exist yet", self.canonical_config.display());
        }

        match self.ip_forward {
            Some(true) => println!("  [ok]   net.ipv4.ip_forward = 1"),
            Some(false) => println!("  [warn] net.ipv4.ip_forward = 0; peers cannot reach beyond the host"),
            None => println!("  [warn] could not read {}", IP_FORWARD_PATH),
        }
    }
}

/// Find `program` in `PATH`, or check it directly if it contains a separator
pub fn locate(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn read_ip_forward(path: &Path) -> Option<bool> {
    match fs::read_to_string(path).ok()?.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}
