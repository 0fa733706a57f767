//! Store key derivation
//!
//! Keys are content-addressed: the same component with the same source
//! (download URL or build command) always maps to the same cache slot.

use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the command hash prefix used in build keys
const BUILD_HASH_LEN: usize = 8;

/// Whether execute-step artifacts are compressed after the build.
///
/// Part of every build key so the two variants never share an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionSalt {
    Compressed,
    Uncompressed,
}

impl CompressionSalt {
    /// Salt for the given compression mode
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            Self::Compressed
        } else {
            Self::Uncompressed
        }
    }
}

impl fmt::Display for CompressionSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compressed => write!(f, "compressed"),
            Self::Uncompressed => write!(f, "uncompressed"),
        }
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key for a downloaded component: `<name>-download-<sha256(url)>`
pub fn download_key(component: &str, url: &str) -> String {
    format!("{}-download-{}", component, sha256_hex(url))
}

/// Key for a built component: `<name>-build-<8 hex chars>`
///
/// The hash covers the command's key material (see
/// `CommandLine::key_material`) and the compression salt.
pub fn build_key(component: &str, command: &str, salt: CompressionSalt) -> String {
    let salted = format!("{}-salt={}", command, salt);
    let hash = sha256_hex(&salted);
    format!("{}-build-{}", component, &hash[..BUILD_HASH_LEN])
}
