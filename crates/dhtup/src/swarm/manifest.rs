//! # Content manifests
//!
//! A content identifier names one immutable manifest: the list of files
//!  (path, size, hash) that make up a published release. The identifier
//!  is the BLAKE3 hash of the manifest's DAG-CBOR encoding, so any source
//!  handing us manifest bytes can be checked against the id we asked for.
//!
//! Paths are root-relative and matched exactly. Publishers lay their content
//!  out so that the files consumers ask for sit at a findable path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of a content identifier in bytes
pub const CONTENT_ID_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest encode error: {0}")]
    Encode(String),
    #[error("manifest decode error: {0}")]
    Decode(String),
    #[error("invalid content id: {0}")]
    InvalidContentId(String),
    #[error("duplicate path in manifest: {0}")]
    DuplicatePath(String),
}

/// Opaque, fixed-size identifier of a content manifest or of a single blob
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ContentId([u8; CONTENT_ID_SIZE]);

impl ContentId {
    /// Hash arbitrary bytes into a content id
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; CONTENT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_SIZE] {
        &self.0
    }

    /// The all-zero id never names real content
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; CONTENT_ID_SIZE]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl TryFrom<&[u8]> for ContentId {
    type Error = ManifestError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; CONTENT_ID_SIZE] = bytes.try_into().map_err(|_| {
            ManifestError::InvalidContentId(format!(
                "expected {} bytes, got {}",
                CONTENT_ID_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl FromStr for ContentId {
    type Err = ManifestError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buff = [0u8; CONTENT_ID_SIZE];
        hex::decode_to_slice(s, &mut buff)
            .map_err(|e| ManifestError::InvalidContentId(e.to_string()))?;
        Ok(Self(buff))
    }
}

impl From<iroh_blobs::Hash> for ContentId {
    fn from(hash: iroh_blobs::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl From<ContentId> for iroh_blobs::Hash {
    fn from(id: ContentId) -> Self {
        iroh_blobs::Hash::from_bytes(id.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_hex())
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
        ContentId::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
    }
}

/// One file of a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub hash: ContentId,
}

/// File list of one piece of content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentManifest {
    files: Vec<FileEntry>,
}

impl ContentManifest {
    /// Build a manifest from entries, sorted by path so that the
    ///  same file set always hashes to the same id
    pub fn new(mut files: Vec<FileEntry>) -> Result<Self, ManifestError> {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(pair) = files.windows(2).find(|pair| pair[0].path == pair[1].path) {
            return Err(ManifestError::DuplicatePath(pair[0].path.clone()));
        }
        Ok(Self { files })
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Exact, root-relative lookup of a file
    pub fn find(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|entry| entry.size).sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ManifestError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| ManifestError::Encode(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, ManifestError> {
        serde_ipld_dagcbor::from_slice(data).map_err(|e| ManifestError::Decode(e.to_string()))
    }

    /// Id of this manifest, the hash of its encoding
    pub fn content_id(&self) -> Result<ContentId, ManifestError> {
        Ok(ContentId::of(&self.encode()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, data: &[u8]) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            size: data.len() as u64,
            hash: ContentId::of(data),
        }
    }

    #[test]
    fn test_id_independent_of_entry_order() {
        let a = ContentManifest::new(vec![entry("a.json", b"a"), entry("b.json", b"b")]).unwrap();
        let b = ContentManifest::new(vec![entry("b.json", b"b"), entry("a.json", b"a")]).unwrap();
        assert_eq!(a.content_id().unwrap(), b.content_id().unwrap());
    }

    #[test]
    fn test_decode_restores_files() {
        let manifest =
            ContentManifest::new(vec![entry("global.json", b"{}"), entry("x", b"xyz")]).unwrap();
        let decoded = ContentManifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.total_size(), 5);
    }

    #[test]
    fn test_find_is_exact() {
        let manifest = ContentManifest::new(vec![entry("dir/global.json", b"{}")]).unwrap();
        assert!(manifest.find("dir/global.json").is_some());
        assert!(manifest.find("global.json").is_none());
        assert!(manifest.find("/dir/global.json").is_none());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let result = ContentManifest::new(vec![entry("a", b"1"), entry("a", b"2")]);
        assert!(matches!(result, Err(ManifestError::DuplicatePath(p)) if p == "a"));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(
            ContentManifest::decode(b"\xff\x00not cbor"),
            Err(ManifestError::Decode(_))
        ));
    }

    #[test]
    fn test_content_id_hex() {
        let id = ContentId::of(b"hello");
        assert_eq!(id.to_hex().parse::<ContentId>().unwrap(), id);
        assert!(!id.is_zero());
        assert!(ContentId::default().is_zero());
        assert!(ContentId::try_from(&[0u8; 20][..]).is_err());
    }
}
