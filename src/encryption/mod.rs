//! Field encryption for sensitive settings
//!
//! Values are sealed with AES-256-GCM and stored as
//! `encrypted:` + base64(nonce ‖ ciphertext ‖ tag). Anything without the
//! prefix is treated as legacy plaintext and passed through on decrypt.

pub mod core;
pub mod key;

pub use core::{EncryptionError, FieldCipher, is_encrypted};
pub use key::{DEFAULT_SECRET, EncryptionKey, KEY_LEN};
