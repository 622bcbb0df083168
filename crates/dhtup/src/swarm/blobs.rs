use std::future::{Future, IntoFuture};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use iroh::discovery::pkarr::dht::DhtDiscovery;
use iroh::protocol::Router;
use iroh::{Endpoint, NodeAddr, NodeId};
use iroh_blobs::{
    api::{
        blobs::{BlobStatus, Blobs},
        downloader::{Downloader, Shuffled},
    },
    store::{fs::FsStore, mem::MemStore},
    BlobsProtocol, Hash,
};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use url::Url;

use super::{
    manifest_for, mirror_file_url, ContentId, ContentManifest, FileEntry, FileReader,
    SessionSources, SwarmClient, SwarmError, SwarmSession,
};
use crate::crypto::{PublicKey, SecretKey};

type Attempt = Pin<Box<dyn Future<Output = Result<(), SwarmError>> + Send>>;

/// Largest manifest accepted over HTTP
pub const MAX_MANIFEST_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Clone, Default)]
pub struct IrohSwarmBuilder {
    /// the socket addr to expose the node on
    ///  if not set, an ephemeral port will be used
    listen_addr: Option<SocketAddr>,
    /// the identity of the node, as a SecretKey
    secret_key: Option<SecretKey>,
    /// where to keep blobs, if not set blobs are kept in memory
    data_dir: Option<PathBuf>,
    /// nodes known to seed published content
    providers: Vec<PublicKey>,
    /// whether to publish our address to and resolve peers through mainline
    mainline_discovery: bool,
}

impl IrohSwarmBuilder {
    pub fn new() -> Self {
        IrohSwarmBuilder {
            listen_addr: None,
            secret_key: None,
            data_dir: None,
            providers: Vec::new(),
            mainline_discovery: true,
        }
    }

    pub fn listen_addr(mut self, listen_addr: SocketAddr) -> Self {
        self.listen_addr = Some(listen_addr);
        self
    }

    pub fn secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub fn data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn providers(mut self, providers: Vec<PublicKey>) -> Self {
        self.providers = providers;
        self
    }

    pub fn mainline_discovery(mut self, enabled: bool) -> Self {
        self.mainline_discovery = enabled;
        self
    }

    pub async fn build(self) -> Result<IrohSwarm, SwarmError> {
        let listen_addr = match self
            .listen_addr
            .unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0))
        {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => {
                return Err(anyhow!("ipv6 listen address {} is not supported", addr).into())
            }
        };
        let secret_key = self.secret_key.unwrap_or_else(SecretKey::generate);

        let blobs = match &self.data_dir {
            Some(data_dir) => {
                let path = data_dir.join("blobs");
                tokio::fs::create_dir_all(&path)
                    .await
                    .map_err(|e| anyhow!("failed to create {:?}: {}", path, e))?;
                tracing::debug!("IrohSwarm::build loading blobs from {:?}", path);
                let store = FsStore::load(&path)
                    .await
                    .map_err(|e| anyhow!("failed to load blob store at {:?}: {}", path, e))?;
                BlobsProtocol::new(&store, None)
            }
            None => {
                let store = MemStore::new();
                BlobsProtocol::new(&store, None)
            }
        };
        let blobs = Arc::new(blobs);

        let endpoint = bind_endpoint(&secret_key, listen_addr, self.mainline_discovery).await?;
        let router = Router::builder(endpoint.clone())
            .accept(iroh_blobs::ALPN, blobs.clone())
            .spawn();

        tracing::info!(
            "IrohSwarm::build node {} listening on {}",
            endpoint.node_id(),
            listen_addr
        );

        Ok(IrohSwarm {
            inner: Arc::new(IrohSwarmInner {
                blobs,
                endpoint,
                router: Mutex::new(Some(router)),
                providers: self.providers.into_iter().map(NodeId::from).collect(),
                http: reqwest::Client::new(),
                unusable_peers_reported: AtomicBool::new(false),
            }),
        })
    }
}

async fn bind_endpoint(
    secret_key: &SecretKey,
    addr: SocketAddrV4,
    mainline_discovery: bool,
) -> Result<Endpoint, SwarmError> {
    let builder = Endpoint::builder().secret_key(secret_key.0.clone());
    let builder = if mainline_discovery {
        let discovery = DhtDiscovery::builder()
            .secret_key(secret_key.0.clone())
            .build()
            .map_err(|e| anyhow!("failed to build mainline discovery: {}", e))?;
        builder.discovery(discovery)
    } else {
        builder
    };
    let endpoint = builder
        .bind_addr_v4(addr)
        .bind()
        .await
        .map_err(|e| anyhow!("failed to bind endpoint on {}: {}", addr, e))?;
    Ok(endpoint)
}

/// Swarm client over an iroh endpoint and an iroh-blobs store
///
/// Content is a DAG-CBOR manifest blob whose entries point at file blobs.
///  Everything in the local store is served to other nodes for as long as
///  the swarm runs.
#[derive(Clone, Debug)]
pub struct IrohSwarm {
    inner: Arc<IrohSwarmInner>,
}

#[derive(Debug)]
struct IrohSwarmInner {
    blobs: Arc<BlobsProtocol>,
    endpoint: Endpoint,
    router: Mutex<Option<Router>>,
    providers: Vec<NodeId>,
    http: reqwest::Client,
    unusable_peers_reported: AtomicBool,
}

impl IrohSwarm {
    pub fn builder() -> IrohSwarmBuilder {
        IrohSwarmBuilder::new()
    }

    pub fn node_id(&self) -> PublicKey {
        PublicKey::from(self.inner.endpoint.node_id())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }
}

impl IrohSwarmInner {
    fn blobs(&self) -> &Blobs {
        self.blobs.store().blobs()
    }

    async fn has(&self, hash: Hash) -> Result<bool, SwarmError> {
        let status = self
            .blobs()
            .status(hash)
            .await
            .map_err(|e| anyhow!("failed to stat {}: {}", hash, e))?;
        Ok(matches!(status, BlobStatus::Complete { .. }))
    }

    async fn get(&self, hash: Hash) -> Result<Bytes, SwarmError> {
        let bytes = self
            .blobs()
            .get_bytes(hash)
            .await
            .map_err(|e| anyhow!("failed to read {}: {}", hash, e))?;
        Ok(bytes)
    }

    async fn put(&self, data: Bytes) -> Result<Hash, SwarmError> {
        let hash = self
            .blobs()
            .add_bytes(data)
            .into_future()
            .await
            .map_err(|e| anyhow!("failed to store blob: {}", e))?
            .hash;
        Ok(hash)
    }

    /// Make `id` complete in the local store, racing the known providers
    ///  against the given HTTP locations
    ///
    /// HTTP bodies longer than `max_len` are rejected.
    async fn acquire(
        self: &Arc<Self>,
        id: ContentId,
        trusted_peers: &[SocketAddr],
        urls: Vec<Url>,
        max_len: u64,
    ) -> Result<(), SwarmError> {
        let hash = Hash::from(id);
        if self.has(hash).await? {
            tracing::debug!("acquire: {} already complete locally", id);
            return Ok(());
        }

        let mut attempts: Vec<Attempt> = Vec::new();
        if !self.providers.is_empty() {
            for provider in &self.providers {
                let node_addr = NodeAddr::from_parts(*provider, None, trusted_peers.to_vec());
                if let Err(e) = self.endpoint.add_node_addr_with_source(node_addr, "dhtup") {
                    tracing::debug!("acquire: could not add address for {}: {}", provider, e);
                }
            }
            let this = self.clone();
            attempts.push(Box::pin(async move { this.download(id).await }));
        } else if !trusted_peers.is_empty() {
            // reported once per swarm, every session hands in the loopback peer
            if !self.unusable_peers_reported.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "acquire: trusted peers {:?} cannot be dialled without provider node ids, configure providers to use them",
                    trusted_peers
                );
            }
        }
        for url in urls {
            let this = self.clone();
            attempts.push(Box::pin(async move { this.fetch_http(id, url, max_len).await }));
        }

        if attempts.is_empty() {
            return Err(SwarmError::Unavailable(id));
        }
        match futures::future::select_ok(attempts).await {
            Ok(((), _)) => Ok(()),
            Err(e) => {
                tracing::warn!("acquire: every source failed for {}, last error: {}", id, e);
                Err(SwarmError::Unavailable(id))
            }
        }
    }

    async fn download(&self, id: ContentId) -> Result<(), SwarmError> {
        tracing::debug!(
            "download: fetching {} from {} providers",
            id,
            self.providers.len()
        );
        let downloader = Downloader::new(self.blobs.store(), &self.endpoint);
        let discovery = Shuffled::new(self.providers.clone());
        downloader
            .download(Hash::from(id), discovery)
            .await
            .map_err(|e| anyhow!("download of {} failed: {}", id, e))?;

        if !self.has(Hash::from(id)).await? {
            return Err(anyhow!("{} not found after download", id).into());
        }
        tracing::info!("download: fetched {} from providers", id);
        Ok(())
    }

    async fn fetch_http(&self, id: ContentId, url: Url, max_len: u64) -> Result<(), SwarmError> {
        tracing::debug!("fetch_http: fetching {} from {}", id, url);
        let too_large = || SwarmError::TooLarge {
            source_url: url.to_string(),
            limit: max_len,
        };
        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| anyhow!("GET {} failed: {}", url, e))?;
        if response.content_length().is_some_and(|len| len > max_len) {
            return Err(too_large());
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| anyhow!("reading body of {} failed: {}", url, e))?
        {
            if (body.len() + chunk.len()) as u64 > max_len {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        let data = body.freeze();

        if ContentId::of(&data) != id {
            return Err(SwarmError::HashMismatch {
                source_url: url.to_string(),
                expected: id,
            });
        }
        self.put(data).await?;
        tracing::info!("fetch_http: fetched {} from {}", id, url);
        Ok(())
    }
}

#[async_trait]
impl SwarmClient for IrohSwarm {
    fn open_session(
        &self,
        content_id: ContentId,
        sources: SessionSources,
    ) -> Result<Arc<dyn SwarmSession>, SwarmError> {
        if self.inner.router.lock().is_none() {
            return Err(SwarmError::Shutdown);
        }
        Ok(Arc::new(IrohSession {
            content_id,
            swarm: self.inner.clone(),
            sources: Mutex::new(sources),
            manifest: OnceCell::new(),
        }))
    }

    async fn seed(&self, files: Vec<(String, Bytes)>) -> Result<ContentId, SwarmError> {
        let manifest = manifest_for(&files)?;
        for (path, data) in files {
            let hash = self.inner.put(data).await?;
            tracing::debug!("seed: stored {} as {}", path, hash);
        }
        let content_id = ContentId::from(self.inner.put(Bytes::from(manifest.encode()?)).await?);
        if content_id != manifest.content_id()? {
            return Err(anyhow!("manifest stored under unexpected hash {}", content_id).into());
        }
        tracing::info!("seed: serving {} ({} files)", content_id, manifest.files().len());
        Ok(content_id)
    }

    async fn shutdown(&self) -> Result<(), SwarmError> {
        let router = self.inner.router.lock().take();
        if let Some(router) = router {
            router
                .shutdown()
                .await
                .map_err(|e| anyhow!("router shutdown failed: {}", e))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct IrohSession {
    content_id: ContentId,
    swarm: Arc<IrohSwarmInner>,
    sources: Mutex<SessionSources>,
    manifest: OnceCell<ContentManifest>,
}

impl IrohSession {
    fn sources(&self) -> SessionSources {
        self.sources.lock().clone()
    }

    async fn fetch_manifest(&self) -> Result<ContentManifest, SwarmError> {
        let sources = self.sources();
        self.swarm
            .acquire(
                self.content_id,
                &sources.trusted_peers,
                sources.manifest_urls,
                MAX_MANIFEST_SIZE,
            )
            .await?;
        let data = self.swarm.get(Hash::from(self.content_id)).await?;
        Ok(ContentManifest::decode(&data)?)
    }
}

#[async_trait]
impl SwarmSession for IrohSession {
    fn content_id(&self) -> ContentId {
        self.content_id
    }

    fn add_sources(&self, sources: SessionSources) {
        self.sources.lock().merge(sources);
    }

    async fn manifest(&self) -> Result<ContentManifest, SwarmError> {
        let manifest = self
            .manifest
            .get_or_try_init(|| self.fetch_manifest())
            .await?;
        Ok(manifest.clone())
    }

    async fn open_file(&self, entry: &FileEntry) -> Result<FileReader, SwarmError> {
        let sources = self.sources();
        let mirrors = sources
            .mirror_urls
            .iter()
            .filter_map(|base| match mirror_file_url(base, &entry.path) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::debug!("open_file: skipping mirror {}: {}", base, e);
                    None
                }
            })
            .collect();
        self.swarm
            .acquire(entry.hash, &sources.trusted_peers, mirrors, entry.size)
            .await?;
        let data = self.swarm.get(Hash::from(entry.hash)).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }
}
