//! WireGuard key pair generation
//!
//! Two backends produce the same key format (32-byte Curve25519 keys,
//! standard base64): [`WgKeyGenerator`] shells out to `wg genkey` and
//! `wg pubkey`, [`X25519KeyGenerator`] computes the keys in-process.
//!
//! Key material never touches the filesystem. The private key is held in a
//! [`Zeroizing`] buffer and wiped when the [`Keypair`] is dropped.

use std::io::{self, Write};
use std::process::{Command, Stdio};

use base64::prelude::*;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::config::{Config, KeygenBackend};
use crate::error::{Error, Result};

/// A freshly generated key pair
pub struct Keypair {
    /// Public key, base64
    pub public_key: String,
    /// Private key, base64
    pub private_key: Zeroizing<String>,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Source of new key pairs
pub trait KeyGenerator {
    /// Generate a new key pair
    fn generate_keypair(&self) -> Result<Keypair>;
}

impl<K: KeyGenerator + ?Sized> KeyGenerator for Box<K> {
    fn generate_keypair(&self) -> Result<Keypair> {
        (**self).generate_keypair()
    }
}

/// Build the generator selected in the configuration
pub fn from_config(config: &Config) -> Box<dyn KeyGenerator> {
    match config.keygen.backend {
        KeygenBackend::Wg => Box::new(WgKeyGenerator::new(config.tools.wg.clone())),
        KeygenBackend::Native => Box::new(X25519KeyGenerator),
    }
}

/// Runs `wg genkey | wg pubkey`, passing keys through pipes only
#[derive(Debug, Clone)]
pub struct WgKeyGenerator {
    binary: String,
}

impl WgKeyGenerator {
    /// Use the given `wg` binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, arg: &str, input: Option<&str>) -> Result<Zeroizing<String>> {
        let mut child = Command::new(&self.binary)
            .arg(arg)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::KeygenFailed(format!("failed to run '{} {}': {}", self.binary, arg, e)))?;

        if let Some(input) = input {
            // The handle is dropped at the end of this match so wg sees EOF
            let written = match child.stdin.take() {
                Some(mut stdin) => stdin.write_all(input.as_bytes()),
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin is not piped")),
            };

            if let Err(e) = written {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::KeygenFailed(format!(
                    "failed to write to '{} {}': {}",
                    self.binary, arg, e
                )));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::KeygenFailed(format!("'{} {}' did not finish: {}", self.binary, arg, e)))?;
        let stdout = Zeroizing::new(output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::KeygenFailed(format!(
                "'{} {}' exited with code {}: {}",
                self.binary,
                arg,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let text = std::str::from_utf8(&stdout)
            .map_err(|_| Error::KeygenFailed(format!("'{} {}' printed invalid UTF-8", self.binary, arg)))?
            .trim();
        if text.is_empty() {
            return Err(Error::KeygenFailed(format!(
                "'{} {}' printed no key",
                self.binary, arg
            )));
        }

        Ok(Zeroizing::new(text.to_string()))
    }
}

impl Default for WgKeyGenerator {
    fn default() -> Self {
        Self::new("wg")
    }
}

impl KeyGenerator for WgKeyGenerator {
    fn generate_keypair(&self) -> Result<Keypair> {
        let private_key = self.run("genkey", None)?;
        let public_key = self.run("pubkey", Some(private_key.as_str()))?;

        log::debug!("Generated key pair with {}", self.binary);
        Ok(Keypair {
            public_key: public_key.to_string(),
            private_key,
        })
    }
}

/// In-process Curve25519 key generation
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519KeyGenerator;

impl KeyGenerator for X25519KeyGenerator {
    fn generate_keypair(&self) -> Result<Keypair> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        // StaticSecret zeroizes itself on drop; the raw bytes are wiped here
        let secret_bytes = Zeroizing::new(secret.to_bytes());

        Ok(Keypair {
            public_key: BASE64_STANDARD.encode(public.as_bytes()),
            private_key: Zeroizing::new(BASE64_STANDARD.encode(&*secret_bytes)),
        })
    }
}

/// Derive the base64 public key for a base64 private key
pub fn public_key_for(private_key: &str) -> Result<String> {
    let bytes = Zeroizing::new(
        BASE64_STANDARD
            .decode(private_key.trim())
            .map_err(|e| Error::KeygenFailed(format!("invalid private key: {}", e)))?,
    );
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::KeygenFailed("private key must be 32 bytes".into()))?;

    let secret = StaticSecret::from(bytes);
    Ok(BASE64_STANDARD.encode(PublicKey::from(&secret).as_bytes()))
}
