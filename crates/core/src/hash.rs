//! Checksum digests and incremental hashing.
//!
//! The engine never trusts a caller-supplied checksum: digests are always
//! computed from the bytes as they stream through, via [`DigestHasher`].

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;

use crate::error::{Error, Result};

/// Checksum algorithm, selected per deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha-256",
            Self::Sha512 => "sha-512",
        }
    }

    /// Parse the stored algorithm name back into the enum.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sha-256" => Ok(Self::Sha256),
            "sha-512" => Ok(Self::Sha512),
            other => Err(Error::InvalidDigest(format!(
                "unknown checksum algorithm: {other}"
            ))),
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Create an incremental hasher for this algorithm.
    pub fn hasher(&self) -> DigestHasher {
        match self {
            Self::Sha256 => DigestHasher::Sha256(Sha256::new()),
            Self::Sha512 => DigestHasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computed checksum value: the algorithm plus its raw digest bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: ChecksumAlgorithm,
    bytes: Vec<u8>,
}

impl Digest {
    /// Compute the digest of a byte slice in one shot.
    pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encode as lowercase hex, the form persisted in metadata rows.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a stored hex digest, checking the length against the algorithm.
    pub fn from_hex(algorithm: ChecksumAlgorithm, s: &str) -> Result<Self> {
        if s.len() != algorithm.digest_len() * 2 {
            return Err(Error::InvalidDigest(format!(
                "expected {} hex chars for {algorithm}, got {}",
                algorithm.digest_len() * 2,
                s.len()
            )));
        }
        let mut bytes = Vec::with_capacity(algorithm.digest_len());
        for chunk in s.as_bytes().chunks(2) {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| Error::InvalidDigest(e.to_string()))?;
            bytes.push(
                u8::from_str_radix(hex_str, 16)
                    .map_err(|e| Error::InvalidDigest(e.to_string()))?,
            );
        }
        Ok(Self { algorithm, bytes })
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental hasher that consumes bytes as they stream past.
///
/// The digest becomes available only after the stream is fully consumed,
/// so store and retrieve paths compute checksums in one pass without
/// buffering whole files.
pub enum DigestHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl DigestHasher {
    /// Update the hasher with the next chunk.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Digest {
        match self {
            Self::Sha256(h) => Digest {
                algorithm: ChecksumAlgorithm::Sha256,
                bytes: h.finalize().to_vec(),
            },
            Self::Sha512(h) => Digest {
                algorithm: ChecksumAlgorithm::Sha512,
                bytes: h.finalize().to_vec(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex_roundtrip() {
        let digest = Digest::compute(ChecksumAlgorithm::Sha256, b"hello world");
        let hex = digest.to_hex();
        let parsed = Digest::from_hex(ChecksumAlgorithm::Sha256, &hex).unwrap();
        assert_eq!(digest, parsed);
        assert_eq!(hex.len(), 64);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = ChecksumAlgorithm::Sha256.hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(
            hasher.finalize(),
            Digest::compute(ChecksumAlgorithm::Sha256, b"hello world")
        );
    }

    #[test]
    fn test_empty_input_digest() {
        // SHA-256 of the empty string.
        let digest = Digest::compute(ChecksumAlgorithm::Sha256, b"");
        assert_eq!(
            digest.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(Digest::from_hex(ChecksumAlgorithm::Sha256, "abcd").is_err());
        assert!(Digest::from_hex(ChecksumAlgorithm::Sha512, &"0".repeat(64)).is_err());
    }

    #[test]
    fn test_algorithm_parse_roundtrip() {
        for algo in [ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Sha512] {
            assert_eq!(ChecksumAlgorithm::parse(algo.as_str()).unwrap(), algo);
        }
        assert!(ChecksumAlgorithm::parse("md5").is_err());
    }
}
