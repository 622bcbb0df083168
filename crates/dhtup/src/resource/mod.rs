//! # Named resources
//!
//! A [`Resource`] names one file of whatever content a signed record at
//!  a DHT target currently points to. It is either the publisher, holding
//!  the signing key, or a consumer that only knows the target:
//!
//! - publishing signs a record pointing the target at a content id
//! - fetching the record looks the target up and verifies what comes back
//! - opening follows the record into the swarm and streams the file
//!
//! Every blocking step runs inside the caller's [`crate::Scope`], and failures
//!  carry a [`FailureClass`] telling a poller whether to back off or wait
//!  for a re-publish.

use bytes::Bytes;
use url::Url;

use crate::context::Context;
use crate::crypto::{PublicKey, SecretKey};
use crate::record::Record;
use crate::swarm::SessionSources;
use crate::target::{Salt, Target};

mod error;
mod opened;
mod publish;
mod resolve;

pub use error::{FailureClass, ResourceError, Step};
pub use opened::OpenedResource;

/// Path resolved when none is configured
pub const DEFAULT_FILE_PATH: &str = "index.json";

/// Who a resource belongs to
#[derive(Debug, Clone)]
pub enum Identity {
    /// Holds the signing key; the target is derived from it
    Publisher { secret_key: SecretKey, salt: Salt },
    /// Knows the target only
    Consumer { target: Target, salt: Salt },
}

impl Identity {
    pub fn target(&self) -> Target {
        match self {
            Identity::Publisher { secret_key, salt } => Target::derive(&secret_key.public(), salt),
            Identity::Consumer { target, .. } => *target,
        }
    }

    pub fn salt(&self) -> &Salt {
        match self {
            Identity::Publisher { salt, .. } | Identity::Consumer { salt, .. } => salt,
        }
    }

    pub fn is_publisher(&self) -> bool {
        matches!(self, Identity::Publisher { .. })
    }
}

/// A whole file fetched through [`Resource::fetch`]
#[derive(Debug, Clone)]
pub struct Fetched {
    pub record: Record,
    pub path: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct Resource {
    context: Context,
    identity: Identity,
    target: Target,
    file_path: String,
    manifest_urls: Vec<Url>,
    mirror_urls: Vec<Url>,
}

impl Resource {
    pub fn new(context: Context, identity: Identity) -> Self {
        let target = identity.target();
        if let Identity::Publisher { secret_key, .. } = &identity {
            context.store().add_signer(secret_key);
        }
        Self {
            context,
            identity,
            target,
            file_path: DEFAULT_FILE_PATH.to_string(),
            manifest_urls: Vec::new(),
            mirror_urls: Vec::new(),
        }
    }

    pub fn publisher(context: Context, secret_key: SecretKey, salt: Salt) -> Self {
        Self::new(context, Identity::Publisher { secret_key, salt })
    }

    pub fn consumer(context: Context, target: Target, salt: Salt) -> Self {
        Self::new(context, Identity::Consumer { target, salt })
    }

    /// A consumer of the record `public_key` publishes under `salt`
    ///
    /// Unlike [`Resource::consumer`] this also tells the store whose key
    ///  to look for, which stores addressing items by key rather than by
    ///  target need.
    pub fn consumer_of(context: Context, public_key: &PublicKey, salt: Salt) -> Self {
        context.store().add_publisher(public_key);
        let target = Target::derive(public_key, &salt);
        Self::consumer(context, target, salt)
    }

    /// Path of the file inside the content, matched exactly
    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = path.into();
        self
    }

    /// HTTP locations serving the encoded manifest
    pub fn with_manifest_urls(mut self, urls: impl IntoIterator<Item = Url>) -> Self {
        self.manifest_urls = urls.into_iter().collect();
        self
    }

    /// Web seeds serving file bytes
    pub fn with_mirror_urls(mut self, urls: impl IntoIterator<Item = Url>) -> Self {
        self.mirror_urls = urls.into_iter().collect();
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn salt(&self) -> &Salt {
        self.identity.salt()
    }

    /// The signing key's public half, publishers only
    pub fn public_key(&self) -> Option<PublicKey> {
        match &self.identity {
            Identity::Publisher { secret_key, .. } => Some(secret_key.public()),
            Identity::Consumer { .. } => None,
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn manifest_urls(&self) -> &[Url] {
        &self.manifest_urls
    }

    pub fn mirror_urls(&self) -> &[Url] {
        &self.mirror_urls
    }

    /// Sources handed to the swarm session resolving this resource
    fn sources(&self) -> SessionSources {
        SessionSources {
            trusted_peers: vec![self.context.config().loopback_peer],
            manifest_urls: self.manifest_urls.clone(),
            mirror_urls: self.mirror_urls.clone(),
        }
    }
}
