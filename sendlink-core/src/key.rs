//! Transfer key: generation, out-of-band export (share-link fragment) and import.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw key length in bytes (256-bit ChaCha20-Poly1305 key).
pub const KEY_LEN: usize = 32;

/// Length of the exported form: unpadded base64url of 32 bytes.
pub const EXPORTED_KEY_LEN: usize = 43;

/// Symmetric key shared by both peers for one transfer.
///
/// Not `Clone`: encoder and decoder borrow it. Zeroized on drop; `Debug` is redacted
/// so the key cannot end up in logs by accident.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct TransferKey([u8; KEY_LEN]);

impl TransferKey {
    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        TransferKey(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        TransferKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Export for the link fragment. Output uses only `A-Z a-z 0-9 - _`.
    pub fn export(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }
}

impl std::fmt::Debug for TransferKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransferKey(<redacted>)")
    }
}

/// Generate a key and its exported representation.
pub fn generate() -> (TransferKey, String) {
    let key = TransferKey::generate();
    let exported = key.export();
    (key, exported)
}

/// Rebuild a key from its exported representation.
pub fn import_from_exported(representation: &str) -> Result<TransferKey, KeyError> {
    if representation.len() != EXPORTED_KEY_LEN {
        return Err(KeyError::InvalidKeyFormat("expected 43 base64url characters"));
    }
    if !representation
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(KeyError::InvalidKeyFormat("not base64url"));
    }
    let mut decoded = URL_SAFE_NO_PAD
        .decode(representation)
        .map_err(|_| KeyError::InvalidKeyFormat("not canonical base64url"))?;
    let bytes: [u8; KEY_LEN] = match decoded.as_slice().try_into() {
        Ok(b) => b,
        Err(_) => {
            decoded.zeroize();
            return Err(KeyError::InvalidKeyFormat("expected 32 key bytes"));
        }
    };
    decoded.zeroize();
    Ok(TransferKey(bytes))
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_is_fragment_safe() {
        let (key, exported) = generate();
        assert_eq!(exported.len(), EXPORTED_KEY_LEN);
        assert!(exported
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(key.export(), exported);
    }

    #[test]
    fn import_roundtrip() {
        let (key, exported) = generate();
        let imported = import_from_exported(&exported).unwrap();
        assert_eq!(imported.as_bytes(), key.as_bytes());
    }

    #[test]
    fn generated_keys_differ() {
        let (a, _) = generate();
        let (b, _) = generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn import_rejects_malformed() {
        let (_, exported) = generate();
        let cases = [
            String::new(),
            exported[..42].to_string(),
            format!("{exported}A"),
            format!("{}=", &exported[..42]),
            format!("{}+", &exported[..42]),
            format!("{}/", &exported[..42]),
            "not a key at all, definitely not base64!!!".to_string(),
        ];
        for case in cases {
            assert!(
                matches!(
                    import_from_exported(&case),
                    Err(KeyError::InvalidKeyFormat(_))
                ),
                "accepted {case:?}"
            );
        }
    }

    #[test]
    fn import_rejects_non_canonical_trailing_bits() {
        // 43 chars encode 258 bits; the last char must leave the low 2 bits zero.
        let key = TransferKey::from_bytes([0u8; KEY_LEN]);
        let mut exported = key.export();
        assert!(exported.ends_with('A'));
        exported.pop();
        exported.push('B');
        assert!(import_from_exported(&exported).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let key = TransferKey::from_bytes([7u8; KEY_LEN]);
        let shown = format!("{key:?}");
        assert!(!shown.contains(&key.export()));
        assert!(shown.contains("redacted"));
    }
}
