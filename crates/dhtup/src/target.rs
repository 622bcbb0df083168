//! Lookup targets
//!
//! A target is where a signed record lives in the DHT. Following BEP-44 it is
//!  the SHA-1 of the publisher's public key followed by the salt, so the same
//!  (key, salt) pair always lands on the same target and a single key can
//!  publish any number of independent records by varying the salt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::crypto::PublicKey;

/// Size of a lookup target in bytes
pub const TARGET_SIZE: usize = 20;
/// Longest salt a DHT node will accept
pub const MAX_SALT_SIZE: usize = 64;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("salt is {0} bytes, at most {MAX_SALT_SIZE} are allowed")]
    SaltTooLong(usize),
    #[error("invalid target: {0}")]
    Invalid(String),
}

/// A 20-byte DHT key under which a signed record is stored
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target([u8; TARGET_SIZE]);

impl Target {
    /// Derive the target for a publisher's key and salt
    pub fn derive(public_key: &PublicKey, salt: &Salt) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(public_key.to_bytes());
        hasher.update(salt.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; TARGET_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TARGET_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut buff = [0u8; TARGET_SIZE];
        hex::decode_to_slice(s, &mut buff).map_err(|e| TargetError::Invalid(e.to_string()))?;
        Ok(Self(buff))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({})", self.to_hex())
    }
}

/// Salt mixed into a target, at most [`MAX_SALT_SIZE`] bytes
///
/// The empty salt is valid and is what BEP-44 calls an unsalted item.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Salt(#[serde(with = "serde_bytes")] Vec<u8>);

impl Salt {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, TargetError> {
        let bytes = bytes.into();
        if bytes.len() > MAX_SALT_SIZE {
            return Err(TargetError::SaltTooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&str> for Salt {
    type Error = TargetError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.as_bytes().to_vec())
    }
}

impl TryFrom<&[u8]> for Salt {
    type Error = TargetError;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::new(value.to_vec())
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Salt({:?})", s),
            Err(_) => write!(f, "Salt(0x{})", hex::encode(&self.0)),
        }
    }
}
