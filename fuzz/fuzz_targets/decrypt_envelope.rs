#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use settings_sync::encryption::{EncryptionError, FieldCipher};
use std::sync::OnceLock;

#[derive(Arbitrary, Debug)]
struct EnvelopeInput {
    /// Raw value handed to decrypt
    value: String,
    /// Bytes wrapped into a syntactically valid envelope
    payload: Vec<u8>,
}

fn cipher() -> &'static FieldCipher {
    static CIPHER: OnceLock<FieldCipher> = OnceLock::new();
    CIPHER.get_or_init(|| FieldCipher::from_secret(Some("fuzz-secret")).expect("cipher"))
}

fuzz_target!(|input: EnvelopeInput| {
    // Attack: arbitrary stored values and forged envelopes
    // Validates: no panics, unprefixed values pass through, forged payloads never decrypt

    match cipher().decrypt(&input.value) {
        Ok(plaintext) => {
            if !input.value.starts_with("encrypted:") {
                assert_eq!(plaintext, input.value, "legacy values must pass through");
            }
        }
        Err(EncryptionError::Integrity(_)) => {
            assert!(input.value.starts_with("encrypted:"));
        }
        Err(e) => panic!("unexpected error kind: {:?}", e),
    }

    use base64::Engine;
    let forged = format!(
        "encrypted:{}",
        base64::engine::general_purpose::STANDARD.encode(&input.payload)
    );
    // Without the key a forged payload cannot authenticate
    assert!(matches!(
        cipher().decrypt(&forged),
        Err(EncryptionError::Integrity(_))
    ));

    if input.value.starts_with("encrypted:") {
        return;
    }
    let sealed = cipher().encrypt(&input.value).expect("encrypt");
    assert_eq!(cipher().decrypt(&sealed).expect("decrypt"), input.value);
});
