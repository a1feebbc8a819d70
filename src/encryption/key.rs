//! Encryption key handling for sensitive settings fields
//!
//! The key is derived once from an operator-supplied secret and normalized to
//! exactly [`KEY_LEN`] bytes for AES-256-GCM:
//! - shorter secrets are zero-padded on the right
//! - longer secrets are truncated
//!
//! When no secret is configured the well-known [`DEFAULT_SECRET`] is used so
//! development setups keep running. That fallback is insecure: every process
//! built from this crate shares it. [`EncryptionKey::is_default`] exposes the
//! condition so configuration checks can flag it.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes
pub const KEY_LEN: usize = 32;

/// Fallback secret used when the operator supplies none
pub const DEFAULT_SECRET: &str = "default-encryption-key-change-in-production";

/// Environment variable holding the operator secret
pub use crate::config::ENCRYPTION_KEY_ENV;

/// Normalized 256-bit key material
///
/// Clone is intentionally not derived; the key lives in exactly one place and is
/// erased on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
    #[zeroize(skip)]
    is_default: bool,
}

impl EncryptionKey {
    /// Build a key from an optional operator secret.
    ///
    /// `None` and the empty string both select [`DEFAULT_SECRET`]. Supplying
    /// the default secret explicitly is treated the same as omitting it.
    pub fn from_secret(secret: Option<&str>) -> Self {
        let (secret, is_default) = match secret {
            Some(s) if !s.is_empty() => (s, s == DEFAULT_SECRET),
            _ => (DEFAULT_SECRET, true),
        };

        Self {
            bytes: normalize(secret.as_bytes()),
            is_default,
        }
    }

    /// Read the secret from [`ENCRYPTION_KEY_ENV`].
    pub fn from_env() -> Self {
        let secret = std::env::var(ENCRYPTION_KEY_ENV).ok();
        Self::from_secret(secret.as_deref())
    }

    /// Raw key bytes for the cipher
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Whether the insecure fallback secret is in use
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Fingerprint for logs and status output
    pub fn fingerprint(&self) -> [u8; 16] {
        key_fingerprint(&self.bytes)
    }

    /// Hex form of [`Self::fingerprint`]
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("fingerprint", &self.fingerprint_hex())
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// Pad with zeros or truncate to exactly [`KEY_LEN`] bytes.
pub fn normalize(secret: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    let len = secret.len().min(KEY_LEN);
    key[..len].copy_from_slice(&secret[..len]);
    key
}

/// Collision-resistant identifier for a key that does not reveal the key.
pub fn key_fingerprint(key: &[u8]) -> [u8; 16] {
    use sha2::Digest;

    let mut hasher = sha2::Sha256::new();
    hasher.update(b"settings_key_fingerprint_v1");
    hasher.update(key);
    let hash = hasher.finalize();
    let mut result = [0u8; 16];
    result.copy_from_slice(&hash[..16]);
    result
}
