//! Provisioning encoders
//!
//! An encoder takes a rendered client configuration and presents it in a
//! form a device can scan. The text is handed over through a pipe and is
//! never written to disk.

use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Turns a client configuration into something a device can import
pub trait ProvisioningEncoder {
    /// Encode `text` onto the encoder's output surface
    fn encode(&self, text: &str) -> Result<()>;
}

impl<E: ProvisioningEncoder + ?Sized> ProvisioningEncoder for Box<E> {
    fn encode(&self, text: &str) -> Result<()> {
        (**self).encode(text)
    }
}

/// Prints a terminal QR code with `qrencode -t ansiutf8`
#[derive(Debug, Clone)]
pub struct QrencodeEncoder {
    binary: String,
}

impl QrencodeEncoder {
    /// Use the given `qrencode` binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for QrencodeEncoder {
    fn default() -> Self {
        Self::new("qrencode")
    }
}

impl ProvisioningEncoder for QrencodeEncoder {
    fn encode(&self, text: &str) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .args(["-t", "ansiutf8"])
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::EncodingUnavailable(format!("'{}' is not installed", self.binary))
                } else {
                    Error::Encoding(format!("failed to run '{}': {}", self.binary, e))
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(text.as_bytes()) {
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Encoding(format!(
                    "failed to write to '{}': {}",
                    self.binary, e
                )));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::Encoding(format!("'{}' did not finish: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Encoding(format!(
                "'{}' exited with code {}: {}",
                self.binary,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(())
    }
}
