//! Deterministic structural hashing.
//!
//! Every hash is SHA-256 over `LIFTER:<domain>:v1` followed by
//! length-prefixed fields, so two values only collide when their canonical
//! renderings are identical field by field.

use sha2::{Digest, Sha256};
use std::fmt;

/// A 256-bit structural hash, rendered and serialized as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructuralHash(pub [u8; 32]);

impl StructuralHash {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 || !s.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for StructuralHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(feature = "serialize")]
impl serde::Serialize for StructuralHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(feature = "serialize")]
impl<'de> serde::Deserialize<'de> for StructuralHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        StructuralHash::from_hex(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid structural hash '{raw}'")))
    }
}

/// Incremental builder for a domain-separated hash over several fields.
pub struct StructuralHasher {
    inner: Sha256,
}

impl StructuralHasher {
    pub fn new(domain: &str) -> Self {
        let mut inner = Sha256::new();
        inner.update(b"LIFTER:");
        inner.update(domain.as_bytes());
        inner.update(b":v1");
        Self { inner }
    }

    pub fn field(mut self, data: &[u8]) -> Self {
        self.inner.update((data.len() as u64).to_le_bytes());
        self.inner.update(data);
        self
    }

    pub fn finish(self) -> StructuralHash {
        StructuralHash(self.inner.finalize().into())
    }
}
