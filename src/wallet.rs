use solana_sdk::signature::Keypair;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// ed25519 secret key followed by the public key
pub const KEYPAIR_BYTES: usize = 64;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("wallet secret is not a JSON array of bytes: {0}")]
    Json(#[from] serde_json::Error),

    #[error("wallet secret must be {KEYPAIR_BYTES} bytes, got {0}")]
    Length(usize),

    #[error("wallet secret is not a valid ed25519 keypair: {0}")]
    Keypair(String),

    #[error("wallet file {0} already exists, refusing to overwrite it")]
    Exists(PathBuf),

    #[error("failed to write wallet file: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a sender keypair from a JSON byte array such as `[12,34,...]`.
pub fn keypair_from_json(secret: &str) -> Result<Keypair, WalletError> {
    let bytes: Vec<u8> = serde_json::from_str(secret.trim())?;
    if bytes.len() != KEYPAIR_BYTES {
        return Err(WalletError::Length(bytes.len()));
    }
    Keypair::from_bytes(&bytes).map_err(|e| WalletError::Keypair(e.to_string()))
}

pub fn keypair_to_json(keypair: &Keypair) -> String {
    // serializing a byte slice cannot fail
    serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap_or_default()
}

/// Generate a fresh sender wallet and write its secret to `path`.
///
/// Fails with [`WalletError::Exists`] if `path` is already there, so an
/// existing (possibly funded) wallet is never replaced.
pub fn generate<P: AsRef<Path>>(path: P) -> Result<Keypair, WalletError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => WalletError::Exists(path.to_path_buf()),
            _ => WalletError::Io(e),
        })?;

    let keypair = Keypair::new();
    file.write_all(keypair_to_json(&keypair).as_bytes())?;
    Ok(keypair)
}
