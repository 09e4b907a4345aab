//! The catalogue manifest: signature to content key.
//!
//! Keys are SHA-256 digests of the descriptor file, hex encoded. The
//! descriptor for key `k` is published as `k.json` next to the manifest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::signature::Signature;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

/// A manifest line with its signature normalized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub signature: Signature,
    pub key: String,
    /// The raw manifest key carried a leading return type.
    pub had_return_type: bool,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn insert(&mut self, signature: &Signature, key: impl Into<String>) {
        self.entries.insert(signature.to_string(), key.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse every signature, dropping return-type prefixes.
    pub fn entries(&self) -> Result<Vec<ManifestEntry>> {
        self.entries
            .iter()
            .map(|(raw, key)| {
                let (signature, had_return_type) = Signature::parse_lenient(raw)?;
                if had_return_type {
                    log::debug!("manifest key '{raw}' normalized to '{signature}'");
                }
                Ok(ManifestEntry {
                    signature,
                    key: key.clone(),
                    had_return_type,
                })
            })
            .collect()
    }
}

/// Content key of a descriptor file.
pub fn content_key(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Check that `bytes` hash to `key`.
pub fn verify_content_key(key: &str, bytes: &[u8]) -> Result<()> {
    let actual = content_key(bytes);
    if actual.eq_ignore_ascii_case(key) {
        Ok(())
    } else {
        Err(Error::DigestMismatch {
            key: key.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_is_sha256_hex() {
        assert_eq!(
            content_key(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let key = content_key(b"{}");
        assert!(verify_content_key(&key, b"{}").is_ok());
        let err = verify_content_key(&key, b"{ }").unwrap_err();
        assert!(
            matches!(err, Error::DigestMismatch { .. }),
            "expected DigestMismatch, got {err}"
        );
    }

    #[test]
    fn return_type_prefix_is_normalized() {
        let manifest = Manifest::from_json(
            r#"{"System.Int32 Game.Calculator::Add(System.Int32,System.Int32)": "k1"}"#,
        )
        .unwrap();
        let entries = manifest.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].had_return_type);
        assert_eq!(
            entries[0].signature.to_string(),
            "Game.Calculator::Add(System.Int32,System.Int32)"
        );
        assert_eq!(entries[0].key, "k1");
    }
}
