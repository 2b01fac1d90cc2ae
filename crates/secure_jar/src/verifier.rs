//! Per-entry manifest digest verification.
//!
//! Enable `secure_jar::verifier=debug` in the tracing filter to log expected
//! and actual digests for each entry.

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::signature::SignerSet;
use base64::Engine;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

const DIGEST_SUFFIX: &str = "-digest";

/// Digest algorithms that manifest `<ALGO>-Digest` headers may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// One-shot digest with a fresh hasher.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        Hasher::new(self).digest(data)
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    /// Accepts `SHA-256`, `sha256` and similar spellings. `SHA` alone means SHA-1.
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA" | "SHA1" => Ok(Self::Sha1),
            "SHA224" => Ok(Self::Sha224),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(Error::UnsupportedDigestAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Self::Md5(Md5::new()),
            DigestAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            DigestAlgorithm::Sha224 => Self::Sha224(Sha224::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            DigestAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// Reset, hash `data`, and leave the hasher reset again.
    fn digest(&mut self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Md5(h) => {
                Digest::reset(h);
                Digest::update(h, data);
                h.finalize_reset().to_vec()
            }
            Self::Sha1(h) => {
                Digest::reset(h);
                Digest::update(h, data);
                h.finalize_reset().to_vec()
            }
            Self::Sha224(h) => {
                Digest::reset(h);
                Digest::update(h, data);
                h.finalize_reset().to_vec()
            }
            Self::Sha256(h) => {
                Digest::reset(h);
                Digest::update(h, data);
                h.finalize_reset().to_vec()
            }
            Self::Sha384(h) => {
                Digest::reset(h);
                Digest::update(h, data);
                h.finalize_reset().to_vec()
            }
            Self::Sha512(h) => {
                Digest::reset(h);
                Digest::update(h, data);
                h.finalize_reset().to_vec()
            }
        }
    }
}

/// Reusable hashers keyed by algorithm.
///
/// Each hasher is held exclusively for one digest computation; different
/// algorithms never contend with each other.
#[derive(Default)]
pub struct DigestEngines {
    engines: Mutex<HashMap<DigestAlgorithm, Arc<Mutex<Hasher>>>>,
}

impl DigestEngines {
    pub fn new() -> Self {
        Self::default()
    }

    fn engine(&self, algorithm: DigestAlgorithm) -> Arc<Mutex<Hasher>> {
        let mut engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        engines
            .entry(algorithm)
            .or_insert_with(|| Arc::new(Mutex::new(Hasher::new(algorithm))))
            .clone()
    }

    pub fn digest(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
        let engine = self.engine(algorithm);
        // A poisoned hasher is reset before use, so its state is irrelevant.
        let mut hasher = engine.lock().unwrap_or_else(PoisonError::into_inner);
        hasher.digest(data)
    }
}

impl fmt::Debug for DigestEngines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engines = self.engines.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("DigestEngines")
            .field("algorithms", &engines.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Outcome of checking one entry against the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedState {
    /// A declared digest did not match.
    Invalid,
    /// Digests matched, or there was nothing to check, and nobody signed the entry.
    Empty,
    /// Digests matched and the entry was signed.
    Signers(SignerSet),
}

impl SignedState {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    pub fn signers(&self) -> Option<&SignerSet> {
        match self {
            Self::Signers(signers) => Some(signers),
            _ => None,
        }
    }
}

/// The `(algorithm, expected)` pairs declared for one entry.
pub fn expected_digests(
    attrs: &crate::manifest::Attributes,
) -> Result<Vec<(DigestAlgorithm, Vec<u8>)>> {
    let mut expected = Vec::new();
    for (key, value) in attrs.iter() {
        let Some(algo) = key
            .len()
            .checked_sub(DIGEST_SUFFIX.len())
            .filter(|&at| at > 0)
            .filter(|&at| key.as_bytes()[at..].eq_ignore_ascii_case(DIGEST_SUFFIX.as_bytes()))
            .and_then(|at| key.get(..at))
        else {
            continue;
        };
        let algorithm: DigestAlgorithm = algo.parse()?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|source| Error::InvalidDigest {
                algorithm: algo.to_string(),
                source,
            })?;
        expected.push((algorithm, bytes));
    }
    Ok(expected)
}

/// Recomputes manifest-declared digests and moves signers from pending to verified.
#[derive(Debug, Default)]
pub struct ManifestVerifier {
    engines: DigestEngines,
}

impl ManifestVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `data` against the digests the manifest declares for `name`.
    ///
    /// Returns [`SignedState::Empty`] if the manifest has no section or no
    /// digests for `name`. On success `name` moves from `pending` to
    /// `verified` if it was pending.
    pub fn verify(
        &self,
        manifest: &Manifest,
        pending: &mut HashMap<String, SignerSet>,
        verified: &mut HashMap<String, SignerSet>,
        name: &str,
        data: &[u8],
    ) -> Result<SignedState> {
        tracing::debug!("Verifying: {}", name);
        let Some(attrs) = manifest.attributes(name) else {
            tracing::debug!("  No manifest entry");
            return Ok(SignedState::Empty);
        };

        let expected = expected_digests(attrs)?;
        if expected.is_empty() {
            tracing::debug!("  No manifest hashes");
            return Ok(SignedState::Empty);
        }

        for (algorithm, value) in &expected {
            let actual = self.engines.digest(*algorithm, data);
            tracing::debug!("  {} Expected: {}", algorithm, hex::encode(value));
            tracing::debug!("  {} Actual:   {}", algorithm, hex::encode(&actual));
            if &actual != value {
                tracing::debug!("  Failed: invalid hashes");
                return Ok(SignedState::Invalid);
            }
        }

        match pending.remove(name) {
            Some(signers) => {
                verified.insert(name.to_string(), signers.clone());
                Ok(SignedState::Signers(signers))
            }
            None => Ok(SignedState::Empty),
        }
    }
}
