use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_KEY_PREFIX: &str = "ocr:receipt:";

/// Size of the head and tail slices sampled by [`EdgeFingerprint`].
const EDGE_BYTES: usize = 32;

/// Derives the cache key for a raw image payload.
pub trait KeyDeriver: Send + Sync {
    fn derive(&self, image: &[u8]) -> String;
}

/// Which [`KeyDeriver`] to build from configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    Edge,
    Sha256,
}

impl KeyStrategy {
    pub fn build(self, prefix: impl Into<String>) -> Box<dyn KeyDeriver> {
        let prefix = prefix.into();
        match self {
            KeyStrategy::Edge => Box::new(EdgeFingerprint::new(prefix)),
            KeyStrategy::Sha256 => Box::new(ContentHash::new(prefix)),
        }
    }
}

/// Cheap fingerprint: payload length below 64 bytes, otherwise the hex of the
/// first and last 32 bytes.
///
/// Not collision resistant: two images of any length that share their first
/// and last 32 bytes map to the same key.
#[derive(Debug, Clone)]
pub struct EdgeFingerprint {
    prefix: String,
}

impl EdgeFingerprint {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for EdgeFingerprint {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyDeriver for EdgeFingerprint {
    fn derive(&self, image: &[u8]) -> String {
        if image.len() < EDGE_BYTES * 2 {
            return format!("{}{}", self.prefix, image.len());
        }
        format!(
            "{}{}{}",
            self.prefix,
            hex::encode(&image[..EDGE_BYTES]),
            hex::encode(&image[image.len() - EDGE_BYTES..])
        )
    }
}

/// Full SHA-256 of the payload.
#[derive(Debug, Clone)]
pub struct ContentHash {
    prefix: String,
}

impl ContentHash {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for ContentHash {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyDeriver for ContentHash {
    fn derive(&self, image: &[u8]) -> String {
        format!("{}sha256:{}", self.prefix, hex::encode(sha256_bytes(image)))
    }
}

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payload_uses_length() {
        let key = EdgeFingerprint::default().derive(&[7u8; 30]);
        assert_eq!(key, "ocr:receipt:30");
    }

    #[test]
    fn payload_of_63_bytes_still_uses_length() {
        assert_eq!(EdgeFingerprint::default().derive(&[0u8; 63]), "ocr:receipt:63");
    }

    #[test]
    fn edge_key_is_head_and_tail_hex() {
        let data: Vec<u8> = (0..100u8).collect();
        let key = EdgeFingerprint::default().derive(&data);
        let head: String = (0..32u8).map(|b| format!("{b:02x}")).collect();
        let tail: String = (68..100u8).map(|b| format!("{b:02x}")).collect();
        assert_eq!(key, format!("ocr:receipt:{head}{tail}"));
        assert_eq!(key.len(), "ocr:receipt:".len() + 128);
    }

    #[test]
    fn edge_keys_collide_when_edges_match() {
        let mut a = vec![1u8; 200];
        let mut b = vec![1u8; 200];
        a[100] = 9;
        b[100] = 42;
        let d = EdgeFingerprint::default();
        assert_eq!(d.derive(&a), d.derive(&b));
        let h = ContentHash::default();
        assert_ne!(h.derive(&a), h.derive(&b));
    }

    #[test]
    fn sha256_known_vector() {
        let key = ContentHash::default().derive(b"");
        assert_eq!(
            key,
            "ocr:receipt:sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn strategy_honours_prefix() {
        let d = KeyStrategy::Edge.build("ocr:receipt:v2:");
        assert_eq!(d.derive(b"abc"), "ocr:receipt:v2:3");
    }
}
