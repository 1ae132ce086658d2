//! Persistent per-device client identity.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Storage key of the client token.
pub const CLIENT_ID_KEY: &str = "wb:clientId";
/// Length of a generated token.
pub const CLIENT_ID_LEN: usize = 7;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Could not determine a data directory")]
    NoDataDir,
}

/// Opaque token that attributes strokes to this device across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    id: String,
}

impl ClientIdentity {
    /// Fresh random token of [`CLIENT_ID_LEN`] base36 characters.
    pub fn generate() -> Self {
        Self {
            id: random_base36(CLIENT_ID_LEN),
        }
    }

    /// Token that is never persisted.
    pub fn ephemeral() -> Self {
        Self::generate()
    }

    /// Read the token stored in `dir`, creating and storing one if absent.
    pub fn load_or_create(dir: &Path) -> Result<Self, IdentityError> {
        let path = Self::key_path(dir);
        if let Ok(stored) = fs::read_to_string(&path) {
            let stored = stored.trim();
            if !stored.is_empty() {
                return Ok(Self { id: stored.to_string() });
            }
            log::warn!("Ignoring empty client id at {}", path.display());
        }

        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| IdentityError::Io(format!("Failed to create {}: {}", dir.display(), e)))?;
        }
        let identity = Self::generate();
        fs::write(&path, &identity.id)
            .map_err(|e| IdentityError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
        log::info!("Created client id {}", identity.id);
        Ok(identity)
    }

    /// Load from the platform data directory.
    ///
    /// On Unix: `~/.local/share/sketchroom/`
    pub fn default_location() -> Result<Self, IdentityError> {
        Self::load_or_create(&Self::default_dir()?)
    }

    pub fn default_dir() -> Result<PathBuf, IdentityError> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or(IdentityError::NoDataDir)?;
        Ok(base.join("sketchroom"))
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    fn key_path(dir: &Path) -> PathBuf {
        let safe_key: String = CLIENT_ID_KEY
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        dir.join(safe_key)
    }
}

impl From<&str> for ClientIdentity {
    fn from(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Random lowercase base36 string of `len` characters (at most 24).
pub fn random_base36(len: usize) -> String {
    let mut n = Uuid::new_v4().as_u128();
    (0..len)
        .map(|_| {
            let c = BASE36[(n % 36) as usize] as char;
            n /= 36;
            c
        })
        .collect()
}
