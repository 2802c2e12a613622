//! Content integrity digests.
//!
//! An [`Integrity`] pairs a hash algorithm with the raw digest bytes. Lockfiles
//! carry them as Subresource Integrity strings (`sha512-<base64>`), Cargo and
//! legacy yarn entries as plain hex; both forms parse into the same value.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while decoding an integrity string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedIntegrityError {
    #[error("Integrity '{0}' is missing the '<algorithm>-' prefix")]
    MissingAlgorithm(String),

    #[error("Unknown integrity algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("Invalid base64 payload for {algorithm}: {reason}")]
    InvalidBase64 { algorithm: Algorithm, reason: String },

    #[error("Invalid hex digest for {algorithm}: {reason}")]
    InvalidHex { algorithm: Algorithm, reason: String },

    #[error("{algorithm} digest must be {expected} bytes, got {actual}")]
    DigestLength {
        algorithm: Algorithm,
        expected: usize,
        actual: usize,
    },
}

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    /// Name as used in integrity strings and manifest keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Native output length in bytes.
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    fn hash(self, content: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => sha1::Sha1::digest(content).to_vec(),
            Self::Sha256 => Sha256::digest(content).to_vec(),
            Self::Sha384 => Sha384::digest(content).to_vec(),
            Self::Sha512 => Sha512::digest(content).to_vec(),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = MalformedIntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(MalformedIntegrityError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// An algorithm-tagged content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Integrity {
    algorithm: Algorithm,
    digest: Vec<u8>,
}

impl Integrity {
    /// Hash `content` in one shot.
    #[must_use]
    pub fn generate(content: impl AsRef<[u8]>, algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            digest: algorithm.hash(content.as_ref()),
        }
    }

    /// Hash `content` with the default algorithm (sha256).
    #[must_use]
    pub fn sha256(content: impl AsRef<[u8]>) -> Self {
        Self::generate(content, Algorithm::Sha256)
    }

    /// Parse an encoded `<algorithm>-<base64(digest)>` string.
    ///
    /// The string is split at the first `-`; the payload uses the standard
    /// base64 alphabet with padding.
    pub fn parse(encoded: &str) -> Result<Self, MalformedIntegrityError> {
        let encoded = encoded.trim();
        let Some((algorithm, payload)) = encoded.split_once('-') else {
            return Err(MalformedIntegrityError::MissingAlgorithm(encoded.to_string()));
        };

        let algorithm: Algorithm = algorithm.parse()?;
        let digest =
            STANDARD
                .decode(payload)
                .map_err(|e| MalformedIntegrityError::InvalidBase64 {
                    algorithm,
                    reason: e.to_string(),
                })?;

        Self::from_digest(algorithm, digest)
    }

    /// Build from a hex-encoded digest, as found in Cargo.lock checksums.
    pub fn from_hex(algorithm: Algorithm, hex_digest: &str) -> Result<Self, MalformedIntegrityError> {
        let digest =
            hex::decode(hex_digest.trim()).map_err(|e| MalformedIntegrityError::InvalidHex {
                algorithm,
                reason: e.to_string(),
            })?;

        Self::from_digest(algorithm, digest)
    }

    /// Build from raw digest bytes, checking the length.
    pub fn from_digest(algorithm: Algorithm, digest: Vec<u8>) -> Result<Self, MalformedIntegrityError> {
        if digest.len() != algorithm.digest_len() {
            return Err(MalformedIntegrityError::DigestLength {
                algorithm,
                expected: algorithm.digest_len(),
                actual: digest.len(),
            });
        }

        Ok(Self { algorithm, digest })
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[must_use]
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Lowercase hex encoding of the digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Standard base64 encoding of the digest.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.digest)
    }

    /// Whether `other` describes different content with the same algorithm.
    ///
    /// Digests of different algorithms cannot be compared and never conflict.
    #[must_use]
    pub fn conflicts_with(&self, other: &Integrity) -> bool {
        self.algorithm == other.algorithm && self.digest != other.digest
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm, self.to_base64())
    }
}

impl FromStr for Integrity {
    type Err = MalformedIntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Incremental sha256 digest for content that is never fully buffered.
///
/// `build` takes the builder by value, so it cannot be finalized twice.
#[derive(Debug, Clone, Default)]
pub struct IntegrityBuilder {
    hasher: Sha256,
}

impl IntegrityBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of content.
    pub fn update(&mut self, chunk: impl AsRef<[u8]>) {
        self.hasher.update(chunk.as_ref());
    }

    /// Finish hashing and return the digest.
    #[must_use]
    pub fn build(self) -> Integrity {
        Integrity {
            algorithm: Algorithm::Sha256,
            digest: self.hasher.finalize().to_vec(),
        }
    }
}
