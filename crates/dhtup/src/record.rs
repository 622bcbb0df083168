//! # Signed records
//!
//! The payload a publisher stores at its target, and the BEP-44 mutable
//!  item that carries it.
//!
//! - **[`Record`]**: content id, sequence number and an optional display name.
//!   Its value is a bencoded dictionary `{ "ih": <32 bytes>, "name": <str> }`;
//!   the sequence number travels in the item, not in the value.
//! - **[`SignedItem`]**: the value together with the publisher's key, salt,
//!   seq and Ed25519 signature over the BEP-44 signable buffer.
//!
//! Both are pure transforms. Nothing here touches the network.

use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey, Signature};
use crate::swarm::ContentId;
use crate::target::{Salt, Target};

/// Largest value a DHT node stores for a mutable item
pub const MAX_VALUE_SIZE: usize = 1000;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record encode error: {0}")]
    Encode(String),
    #[error("record decode error: {0}")]
    Decode(String),
    #[error("record value is {0} bytes, at most {MAX_VALUE_SIZE} are allowed")]
    ValueTooLarge(usize),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("item for target {expected} was stored at {actual}")]
    TargetMismatch { expected: Target, actual: Target },
}

/// Wire shape of the value
#[derive(Serialize, Deserialize)]
struct Payload {
    #[serde(with = "serde_bytes")]
    ih: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// Latest version published at a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub content_id: ContentId,
    pub seq: i64,
    pub name: Option<String>,
}

impl Record {
    pub fn new(content_id: ContentId, seq: i64, name: Option<String>) -> Self {
        Self {
            content_id,
            seq,
            name,
        }
    }

    /// Encode the value stored in the DHT
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        let payload = Payload {
            ih: self.content_id.as_bytes().to_vec(),
            name: self.name.clone(),
        };
        let value =
            serde_bencode::to_bytes(&payload).map_err(|e| RecordError::Encode(e.to_string()))?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(RecordError::ValueTooLarge(value.len()));
        }
        Ok(value)
    }

    /// Decode a stored value, pairing it with the item's sequence number
    pub fn decode(value: &[u8], seq: i64) -> Result<Self, RecordError> {
        let payload: Payload =
            serde_bencode::from_bytes(value).map_err(|e| RecordError::Decode(e.to_string()))?;
        let content_id = ContentId::try_from(payload.ih.as_slice())
            .map_err(|e| RecordError::Decode(format!("ih: {}", e)))?;
        Ok(Self {
            content_id,
            seq,
            name: payload.name,
        })
    }

    /// Sign this record as a mutable item under `salt`
    pub fn sign(&self, secret_key: &SecretKey, salt: &Salt) -> Result<SignedItem, RecordError> {
        let value = self.encode()?;
        Ok(SignedItem::sign(secret_key, salt.clone(), self.seq, value))
    }

    /// Decode the record carried by an item. Does not check the signature.
    pub fn from_item(item: &SignedItem) -> Result<Self, RecordError> {
        Self::decode(item.value(), item.seq())
    }
}

/// A BEP-44 mutable item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedItem {
    public_key: PublicKey,
    salt: Salt,
    seq: i64,
    value: Vec<u8>,
    signature: Signature,
}

impl SignedItem {
    pub fn sign(secret_key: &SecretKey, salt: Salt, seq: i64, value: Vec<u8>) -> Self {
        let signature = secret_key.sign(&signable(&salt, seq, &value));
        Self {
            public_key: secret_key.public(),
            salt,
            seq,
            value,
            signature,
        }
    }

    /// Reassemble an item received from the network
    pub fn from_parts(
        public_key: PublicKey,
        salt: Salt,
        seq: i64,
        value: Vec<u8>,
        signature: Signature,
    ) -> Self {
        Self {
            public_key,
            salt,
            seq,
            value,
            signature,
        }
    }

    pub fn verify(&self) -> Result<(), RecordError> {
        if self.value.len() > MAX_VALUE_SIZE {
            return Err(RecordError::ValueTooLarge(self.value.len()));
        }
        self.public_key
            .verify(&signable(&self.salt, self.seq, &self.value), &self.signature)
            .map_err(|_| RecordError::InvalidSignature)
    }

    /// Check the signature and that the item belongs at `expected`
    pub fn verify_for(&self, expected: &Target) -> Result<(), RecordError> {
        let actual = self.target();
        if &actual != expected {
            return Err(RecordError::TargetMismatch {
                expected: *expected,
                actual,
            });
        }
        self.verify()
    }

    pub fn target(&self) -> Target {
        Target::derive(&self.public_key, &self.salt)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// The buffer BEP-44 signs: `4:salt<len>:<salt>3:seqi<seq>e1:v<value>`,
///  with the salt part omitted when the salt is empty
fn signable(salt: &Salt, seq: i64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.len() + salt.as_bytes().len() + 32);
    if !salt.is_empty() {
        buf.extend_from_slice(format!("4:salt{}:", salt.as_bytes().len()).as_bytes());
        buf.extend_from_slice(salt.as_bytes());
    }
    buf.extend_from_slice(format!("3:seqi{}e1:v", seq).as_bytes());
    buf.extend_from_slice(value);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_id() -> ContentId {
        ContentId::of(b"release-1")
    }

    #[test]
    fn test_decode_restores_record() {
        let record = Record::new(content_id(), 4, Some("test".to_string()));
        let decoded = Record::decode(&record.encode().unwrap(), 4).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_name_is_optional() {
        let record = Record::new(content_id(), 0, None);
        let value = record.encode().unwrap();
        assert!(!value.windows(4).any(|w| w == b"name"));
        assert_eq!(Record::decode(&value, 0).unwrap().name, None);
    }

    #[test]
    fn test_value_is_a_bencoded_dict() {
        let record = Record::new(ContentId::from_bytes([b'a'; 32]), 0, Some("n".to_string()));
        let mut expected = b"d2:ih32:".to_vec();
        expected.extend_from_slice(&[b'a'; 32]);
        expected.extend_from_slice(b"4:name1:ne");
        assert_eq!(record.encode().unwrap(), expected);
    }

    #[test]
    fn test_malformed_values() {
        // not bencode
        assert!(matches!(Record::decode(b"hello", 0), Err(RecordError::Decode(_))));
        // truncated
        let value = Record::new(content_id(), 0, None).encode().unwrap();
        assert!(matches!(
            Record::decode(&value[..value.len() - 3], 0),
            Err(RecordError::Decode(_))
        ));
        // missing ih
        assert!(matches!(Record::decode(b"d4:name1:ne", 0), Err(RecordError::Decode(_))));
        // ih of the wrong type
        assert!(matches!(Record::decode(b"d2:ihi5ee", 0), Err(RecordError::Decode(_))));
        // ih of the wrong length
        assert!(matches!(Record::decode(b"d2:ih3:abce", 0), Err(RecordError::Decode(_))));
    }

    #[test]
    fn test_oversized_name_rejected() {
        let record = Record::new(content_id(), 0, Some("x".repeat(MAX_VALUE_SIZE)));
        assert!(matches!(record.encode(), Err(RecordError::ValueTooLarge(_))));
    }

    #[test]
    fn test_signable_layout() {
        let salt = Salt::try_from("foobar").unwrap();
        assert_eq!(
            signable(&salt, 1, b"12:Hello World!"),
            b"4:salt6:foobar3:seqi1e1:v12:Hello World!".to_vec()
        );
        assert_eq!(
            signable(&Salt::default(), 1, b"12:Hello World!"),
            b"3:seqi1e1:v12:Hello World!".to_vec()
        );
    }

    #[test]
    fn test_signed_item_verifies() {
        let key = SecretKey::generate();
        let salt = Salt::try_from("s").unwrap();
        let item = Record::new(content_id(), 7, None).sign(&key, &salt).unwrap();
        assert!(item.verify().is_ok());
        assert_eq!(item.target(), Target::derive(&key.public(), &salt));
        assert!(item.verify_for(&Target::derive(&key.public(), &salt)).is_ok());
        assert_eq!(Record::from_item(&item).unwrap().seq, 7);
    }

    #[test]
    fn test_tampered_item_fails() {
        let key = SecretKey::generate();
        let salt = Salt::try_from("s").unwrap();
        let item = Record::new(content_id(), 7, None).sign(&key, &salt).unwrap();

        let bumped = SignedItem::from_parts(
            *item.public_key(),
            item.salt().clone(),
            8,
            item.value().to_vec(),
            *item.signature(),
        );
        assert_eq!(bumped.verify(), Err(RecordError::InvalidSignature));

        let other_target = Target::derive(&key.public(), &Salt::try_from("t").unwrap());
        assert!(matches!(
            item.verify_for(&other_target),
            Err(RecordError::TargetMismatch { .. })
        ));
    }
}
