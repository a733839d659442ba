//! # Fingerprinting
//!
//! A [`Fingerprint`] is a BLAKE3 digest. Content providers fingerprint their
//! bytes; [`Fingerprinter`] combines that checksum with a stable hash of the
//! document's metadata, skipping configured volatile keys (build timestamps,
//! global settings echoed into every document). Equal content and equal
//! non-volatile metadata always give equal fingerprints, which makes them
//! usable as cache keys and for write-skip decisions.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use crate::document::Document;
use crate::error::{Error, Result};

/// A 256-bit content/metadata digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Hash everything a reader yields.
    pub fn of_reader(mut reader: impl Read) -> Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 16 * 1024];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(*hasher.finalize().as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::execution(format!(
            "Invalid fingerprint '{}': {}",
            s, e
        )))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::execution(format!("Invalid fingerprint length: '{}'", s)))?;
        Ok(Self(array))
    }
}

/// Computes document fingerprints, ignoring volatile metadata keys.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    volatile_keys: BTreeSet<String>,
}

impl Fingerprinter {
    pub fn new<I, S>(volatile_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            volatile_keys: volatile_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_volatile(&self, key: &str) -> bool {
        self.volatile_keys.contains(key)
    }

    /// Fingerprint a document's content bytes and stable metadata.
    pub fn fingerprint(&self, document: &Document) -> Result<Fingerprint> {
        let content = document.content().fingerprint()?;

        let mut stable: Vec<(&str, &serde_json::Value)> = document
            .metadata()
            .iter()
            .filter(|(key, _)| !self.is_volatile(key))
            .collect();
        stable.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = blake3::Hasher::new();
        hasher.update(content.as_bytes());
        for (key, value) in stable {
            let encoded = serde_json::to_vec(value)?;
            hasher.update(&(key.len() as u64).to_le_bytes());
            hasher.update(key.as_bytes());
            hasher.update(&(encoded.len() as u64).to_le_bytes());
            hasher.update(&encoded);
        }
        Ok(Fingerprint(*hasher.finalize().as_bytes()))
    }
}
