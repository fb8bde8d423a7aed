//! Hash algorithms used by CodeDirectories.

use super::constants::{CS_HASHTYPE_SHA1, CS_HASHTYPE_SHA256, CS_SHA1_LEN, CS_SHA256_LEN};
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Hash algorithm of one CodeDirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestType {
    /// Legacy directory kept for older verifiers.
    Sha1,
    Sha256,
}

impl DigestType {
    /// Value of the CodeDirectory `hashType` field.
    pub fn hash_type(self) -> u8 {
        match self {
            Self::Sha1 => CS_HASHTYPE_SHA1,
            Self::Sha256 => CS_HASHTYPE_SHA256,
        }
    }

    /// Digest width in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Sha1 => CS_SHA1_LEN,
            Self::Sha256 => CS_SHA256_LEN,
        }
    }

    pub fn from_hash_type(value: u8) -> Option<Self> {
        match value {
            CS_HASHTYPE_SHA1 => Some(Self::Sha1),
            CS_HASHTYPE_SHA256 => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => sha1(data).to_vec(),
            Self::Sha256 => sha256(data).to_vec(),
        }
    }
}

pub fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
