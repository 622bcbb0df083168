//! Swarm distribution boundary
//!
//! Content ids are resolved to bytes by a [`SwarmClient`]. One
//!  [`SwarmSession`] exists per content id; it acquires the manifest and
//!  opens files using whatever sources it has been handed, trying them
//!  concurrently:
//!
//! - **trusted peers**: addresses dialled directly, for instance the
//!   loopback peer that covers a publisher running on the same host
//! - **manifest urls**: HTTP locations serving the encoded manifest
//! - **mirror urls**: HTTP web seeds serving raw file bytes
//!
//! Piece selection and wire protocols stay inside implementations.

use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;
use url::Url;

mod blobs;
mod manifest;
mod memory;

pub use blobs::{IrohSwarm, IrohSwarmBuilder};
pub use manifest::{ContentId, ContentManifest, FileEntry, ManifestError, CONTENT_ID_SIZE};
pub use memory::MemorySwarm;

#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("swarm error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("no source could provide {0}")]
    Unavailable(ContentId),
    #[error("content from {source_url} does not hash to {expected}")]
    HashMismatch { source_url: String, expected: ContentId },
    #[error("content from {source_url} is larger than {limit} bytes")]
    TooLarge { source_url: String, limit: u64 },
    #[error("swarm client is shut down")]
    Shutdown,
}

/// Readable bytes of one file
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Fallback sources handed to a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSources {
    pub trusted_peers: Vec<SocketAddr>,
    pub manifest_urls: Vec<Url>,
    pub mirror_urls: Vec<Url>,
}

impl SessionSources {
    /// Add everything in `other` that is not already known
    pub fn merge(&mut self, other: SessionSources) {
        fn extend<T: PartialEq>(into: &mut Vec<T>, from: Vec<T>) {
            for item in from {
                if !into.contains(&item) {
                    into.push(item);
                }
            }
        }
        extend(&mut self.trusted_peers, other.trusted_peers);
        extend(&mut self.manifest_urls, other.manifest_urls);
        extend(&mut self.mirror_urls, other.mirror_urls);
    }

    pub fn is_empty(&self) -> bool {
        self.trusted_peers.is_empty() && self.manifest_urls.is_empty() && self.mirror_urls.is_empty()
    }
}

#[async_trait]
pub trait SwarmClient: Send + Sync + Debug + 'static {
    /// Create the session for `content_id`
    ///
    /// Synchronous so that a registry can create sessions while holding
    ///  its lock; any network work belongs in the session itself.
    fn open_session(
        &self,
        content_id: ContentId,
        sources: SessionSources,
    ) -> Result<Arc<dyn SwarmSession>, SwarmError>;

    /// Make a set of files available, returning the id of their manifest
    async fn seed(&self, files: Vec<(String, Bytes)>) -> Result<ContentId, SwarmError>;

    /// Stop serving and release sockets and storage
    async fn shutdown(&self) -> Result<(), SwarmError> {
        Ok(())
    }
}

#[async_trait]
pub trait SwarmSession: Send + Sync + Debug + 'static {
    fn content_id(&self) -> ContentId;

    /// Hand the session more sources; known ones are ignored
    fn add_sources(&self, sources: SessionSources);

    /// Wait until the manifest is available
    ///
    /// May wait indefinitely; callers bound it with a [`crate::Scope`].
    async fn manifest(&self) -> Result<ContentManifest, SwarmError>;

    /// Open a stream over one file of the manifest
    async fn open_file(&self, entry: &FileEntry) -> Result<FileReader, SwarmError>;
}

/// Build the web seed url for a file: a base ending in `/` is a
///  directory the path is appended to, anything else names the file itself
pub(crate) fn mirror_file_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    if base.path().ends_with('/') {
        base.join(path)
    } else {
        Ok(base.clone())
    }
}

/// Build a manifest for `files`, hashing each one
pub(crate) fn manifest_for(files: &[(String, Bytes)]) -> Result<ContentManifest, ManifestError> {
    ContentManifest::new(
        files
            .iter()
            .map(|(path, data)| FileEntry {
                path: path.clone(),
                size: data.len() as u64,
                hash: ContentId::of(data),
            })
            .collect(),
    )
}
