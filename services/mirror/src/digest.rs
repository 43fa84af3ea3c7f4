//! Content digests

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prefix of every digest string this mirror recognizes.
pub const SHA256_PREFIX: &str = "sha256:";

const SHA256_HEX_LEN: usize = 64;

/// Digest algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// SHA-256, the only algorithm registries are required to support
    Sha256,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Sha256 => f.write_str("sha256"),
        }
    }
}

/// Errors from parsing a digest string
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// No `algorithm:` prefix
    #[error("cannot parse digest {0:?}: missing algorithm separator")]
    Malformed(String),

    /// Anything other than `sha256`
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    /// Wrong number of hex characters
    #[error("sha256 digest must have {SHA256_HEX_LEN} hex characters, got {0}")]
    Length(usize),

    /// Not hex
    #[error("invalid digest hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Hex digits must be lowercase
    #[error("digest hex must be lowercase")]
    Uppercase,
}

/// A content address: `sha256:<64 hex characters>`.
///
/// Two digests are equal when algorithm and hex are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parse `sha256:<hex>`.
    pub fn parse(value: &str) -> Result<Self, DigestError> {
        let (algorithm, hex) = value
            .split_once(':')
            .ok_or_else(|| DigestError::Malformed(value.to_owned()))?;

        let algorithm = match algorithm {
            "sha256" => Algorithm::Sha256,
            other => return Err(DigestError::UnsupportedAlgorithm(other.to_owned())),
        };

        if hex.len() != SHA256_HEX_LEN {
            return Err(DigestError::Length(hex.len()));
        }
        hex::decode(hex)?;
        if hex.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(DigestError::Uppercase);
        }

        Ok(Digest {
            algorithm,
            hex: hex.to_owned(),
        })
    }

    /// Whether a path segment or identifier is shaped like a digest and should be parsed as one.
    pub fn has_prefix(value: &str) -> bool {
        value.starts_with(SHA256_PREFIX)
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded hash value.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}
