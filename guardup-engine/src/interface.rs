//! Host interface configuration file
//!
//! The managed file holds one `[Interface]` section followed by peer blocks
//! in the order they were added. Each peer block is framed by a sentinel
//! header and an end marker:
//!
//! ```text
//! [Peer] # alice
//! PublicKey = ...
//! AllowedIPs = 10.0.0.2/32
//! # end-peer alice
//! ```
//!
//! Blocks are located by the sentinel, never by line offsets. Blocks written
//! without an end marker are still recognized; they end before the next
//! section header.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Sentinel line that opens the block of `name`
pub fn sentinel(name: &str) -> String {
    format!("[Peer] # {}", name)
}

/// Marker line that closes the block of `name`
pub fn end_marker(name: &str) -> String {
    format!("# end-peer {}", name)
}

/// Frame a rendered peer body with its sentinel and end marker
pub fn frame_block(name: &str, body: &str) -> String {
    let mut block = sentinel(name);
    block.push('\n');
    block.push_str(body);
    if !body.is_empty() && !body.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(&end_marker(name));
    block.push('\n');
    block
}

/// The managed interface configuration file
#[derive(Debug, Clone)]
pub struct InterfaceFile {
    path: PathBuf,
}

impl InterfaceFile {
    /// Manage the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the managed file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file has been created
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Append a framed peer block, surrounded by blank lines.
    ///
    /// The file is never created here; the host block must exist first.
    pub fn append_peer_block(&self, name: &str, body: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.not_initialized_or(e))?;

        let mut chunk = String::from("\n");
        chunk.push_str(&frame_block(name, body));
        chunk.push('\n');

        file.write_all(chunk.as_bytes())?;
        file.sync_all()?;

        log::info!("Appended block for peer '{}' to {:?}", name, self.path);
        Ok(())
    }

    /// Remove the first block whose sentinel matches `name`.
    ///
    /// The file is replaced atomically. One blank separator line on each
    /// side of the block goes with it. Every other line is kept byte for
    /// byte, line terminators included.
    pub fn remove_peer_block(&self, name: &str) -> Result<()> {
        let content = self.read()?;
        let lines: Vec<&str> = content.split_inclusive('\n').collect();

        let (start, end) = find_block(&lines, name)
            .ok_or_else(|| Error::PeerBlockNotFound(name.to_string()))?;

        let start = if start > 0 && lines[start - 1].trim().is_empty() {
            start - 1
        } else {
            start
        };
        let end = if end < lines.len() && lines[end].trim().is_empty() {
            end + 1
        } else {
            end
        };

        let kept: String = lines[..start]
            .iter()
            .chain(lines[end..].iter())
            .copied()
            .collect();

        self.replace(&kept)?;
        log::info!("Removed block for peer '{}' from {:?}", name, self.path);
        Ok(())
    }

    /// Write the host block and link `link_path` to the managed file.
    ///
    /// Fails with [`Error::AlreadyInitialized`] if anything exists at
    /// `link_path`, including a dangling symlink.
    pub fn initialize_host_block(&self, host_block: &str, link_path: &Path) -> Result<()> {
        if path_occupied(link_path)? {
            return Err(Error::AlreadyInitialized(link_path.to_path_buf()));
        }

        self.replace(host_block)?;
        link(&self.path, link_path)?;

        log::info!(
            "Initialized {:?} and linked it from {:?}",
            self.path,
            link_path
        );
        Ok(())
    }

    /// Link `link_path` to the managed file unless something is already there.
    ///
    /// Returns whether a link was created.
    pub fn ensure_link(&self, link_path: &Path) -> Result<bool> {
        if path_occupied(link_path)? {
            return Ok(false);
        }

        link(&self.path, link_path)?;
        log::info!("Linked {:?} to {:?}", link_path, self.path);
        Ok(true)
    }

    /// Peer names of all sentinels in file order
    pub fn peer_names(&self) -> Result<Vec<String>> {
        let content = self.read()?;
        Ok(content
            .lines()
            .filter_map(|line| parse_sentinel(line).map(str::to_string))
            .collect())
    }

    /// Replace the whole file with a host block followed by framed peer blocks
    pub fn rewrite<'a, I>(&self, host_block: &str, peers: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        if !self.exists() {
            return Err(Error::ConfigNotInitialized(self.path.clone()));
        }

        let mut content = host_block.to_string();
        for (name, body) in peers {
            content.push('\n');
            content.push_str(&frame_block(name, &body));
            content.push('\n');
        }

        self.replace(&content)?;
        log::info!("Rewrote {:?}", self.path);
        Ok(())
    }

    /// Current file content
    pub fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path).map_err(|e| self.not_initialized_or(e))
    }

    fn replace(&self, content: &str) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        // NamedTempFile is created with mode 0600 and removed if we bail out
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn not_initialized_or(&self, e: std::io::Error) -> Error {
        if e.kind() == ErrorKind::NotFound {
            Error::ConfigNotInitialized(self.path.clone())
        } else {
            Error::Io(e)
        }
    }
}

/// Whether anything, including a dangling symlink, exists at `path`.
///
/// Only a missing entry counts as free; permission and lookup errors are
/// returned.
pub fn path_occupied(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Name carried by a sentinel line, if `line` is one
fn parse_sentinel(line: &str) -> Option<&str> {
    line.trim_end()
        .strip_prefix("[Peer] # ")
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// Line range `[start, end)` of the block for `name`
fn find_block(lines: &[&str], name: &str) -> Option<(usize, usize)> {
    let start = lines
        .iter()
        .position(|line| parse_sentinel(line) == Some(name))?;

    let marker = end_marker(name);
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        let idx = start + 1 + offset;
        if line.trim_end() == marker {
            return Some((start, idx + 1));
        }
        if line.trim_start().starts_with('[') {
            return Some((start, trim_trailing_blank(lines, start, idx)));
        }
    }

    Some((start, trim_trailing_blank(lines, start, lines.len())))
}

fn trim_trailing_blank(lines: &[&str], start: usize, mut end: usize) -> usize {
    while end > start + 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    end
}

#[cfg(unix)]
fn link(target: &Path, link_path: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link_path).map_err(|e| {
        if e.kind() == ErrorKind::AlreadyExists {
            Error::AlreadyInitialized(link_path.to_path_buf())
        } else {
            Error::Io(e)
        }
    })
}

#[cfg(not(unix))]
fn link(_target: &Path, link_path: &Path) -> Result<()> {
    Err(Error::Config(format!(
        "cannot link {:?}: symbolic links are only supported on Unix",
        link_path
    )))
}
