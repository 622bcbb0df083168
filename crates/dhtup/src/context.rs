//! # Shared session context
//!
//! One [`Context`] per process (or per test) owns the long-lived clients
//!  every [`crate::Resource`] works through:
//!
//! - the distributed store records are read from and written to
//! - the swarm client content is resolved through
//! - the registry of swarm sessions, keyed by content id
//!
//! Sessions are created the first time a content id is resolved and are
//!  never torn down while the context lives: resources pointing at the
//!  same content share one session, and the content keeps being served
//!  to other peers. Nothing is reclaimed before [`Context::shutdown`].

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::ContextConfig;
use crate::store::{DhtStore, MainlineDht, MemoryDht, StoreError};
use crate::swarm::{
    ContentId, IrohSwarm, MemorySwarm, SessionSources, SwarmClient, SwarmError, SwarmSession,
};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("swarm error: {0}")]
    Swarm(#[from] SwarmError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Default)]
pub struct ContextBuilder {
    store: Option<Arc<dyn DhtStore>>,
    swarm: Option<Arc<dyn SwarmClient>>,
    config: Option<ContextConfig>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: impl DhtStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn swarm(mut self, swarm: impl SwarmClient) -> Self {
        self.swarm = Some(Arc::new(swarm));
        self
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Assemble the context, falling back to in-memory clients for
    ///  anything not provided
    pub fn build(self) -> Context {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryDht::new()) as Arc<dyn DhtStore>);
        let swarm = self
            .swarm
            .unwrap_or_else(|| Arc::new(MemorySwarm::new()) as Arc<dyn SwarmClient>);
        Context {
            inner: Arc::new(ContextInner {
                store,
                swarm,
                sessions: Mutex::new(HashMap::new()),
                config: self.config.unwrap_or_default(),
            }),
        }
    }
}

/// Handle to the process-wide clients, cheap to clone
#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    store: Arc<dyn DhtStore>,
    swarm: Arc<dyn SwarmClient>,
    sessions: Mutex<HashMap<ContentId, Arc<dyn SwarmSession>>>,
    config: ContextConfig,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// A context over fresh in-memory clients
    pub fn memory() -> Self {
        Self::builder().build()
    }

    /// Spawn an iroh swarm node as described by `config`, storing
    ///  records through `store`
    pub async fn from_config(
        config: ContextConfig,
        store: impl DhtStore,
    ) -> Result<Self, ContextError> {
        let mut swarm = IrohSwarm::builder()
            .providers(config.providers.clone())
            .mainline_discovery(config.mainline_discovery);
        if let Some(listen_addr) = config.listen_addr {
            swarm = swarm.listen_addr(listen_addr);
        }
        if let Some(data_dir) = &config.data_dir {
            swarm = swarm.data_dir(data_dir);
        }
        let swarm = swarm.build().await?;
        tracing::info!(
            "Context::from_config swarm node {} ready, data dir {:?}",
            *swarm.node_id(),
            config.data_dir
        );

        Ok(Self::builder()
            .store(store)
            .swarm(swarm)
            .config(config)
            .build())
    }

    /// Join the mainline dht and spawn an iroh swarm node, both as
    ///  described by `config`
    pub async fn connect(config: ContextConfig) -> Result<Self, ContextError> {
        let mut store = MainlineDht::builder()
            .extra_bootstrap(&config.dht_bootstrap)
            .server_mode(config.dht_server_mode)
            .publishers(config.publishers.iter().copied());
        if let Some(port) = config.dht_port {
            store = store.port(port);
        }
        let store = store.build()?;
        Self::from_config(config, store).await
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn DhtStore> {
        &self.inner.store
    }

    pub fn swarm(&self) -> &Arc<dyn SwarmClient> {
        &self.inner.swarm
    }

    /// Make files available through the swarm, returning the content id
    ///  to publish
    pub async fn seed(&self, files: Vec<(String, Bytes)>) -> Result<ContentId, ContextError> {
        Ok(self.inner.swarm.seed(files).await?)
    }

    /// Get the session for `content_id`, creating it on first use
    ///
    /// An existing session is handed `sources` as well, so every
    ///  resolving resource contributes its fallbacks.
    pub fn session(
        &self,
        content_id: ContentId,
        sources: SessionSources,
    ) -> Result<Arc<dyn SwarmSession>, SwarmError> {
        let mut sessions = self.inner.sessions.lock();
        if let Some(session) = sessions.get(&content_id) {
            session.add_sources(sources);
            return Ok(session.clone());
        }
        let session = self.inner.swarm.open_session(content_id, sources)?;
        tracing::debug!("Context::session created session for {}", content_id);
        sessions.insert(content_id, session.clone());
        Ok(session)
    }

    /// Number of live swarm sessions
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Close the swarm client and the store
    pub async fn shutdown(&self) -> Result<(), ContextError> {
        tracing::info!(
            "Context::shutdown closing {} sessions",
            self.session_count()
        );
        self.inner.swarm.shutdown().await?;
        self.inner.store.close().await?;
        self.inner.sessions.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_is_reused() {
        let swarm = MemorySwarm::new();
        let context = Context::builder().swarm(swarm.clone()).build();
        let id = ContentId::of(b"content");

        let a = context.session(id, SessionSources::default()).unwrap();
        let b = context.session(id, SessionSources::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(context.session_count(), 1);
        assert_eq!(swarm.sessions_opened(), 1);

        context
            .session(ContentId::of(b"other"), SessionSources::default())
            .unwrap();
        assert_eq!(context.session_count(), 2);
    }

    #[tokio::test]
    async fn test_reuse_adds_sources() {
        let swarm = MemorySwarm::new();
        let context = Context::builder().swarm(swarm.clone()).build();
        let id = ContentId::of(b"content");
        let mirror = url::Url::parse("https://mirror.example/").unwrap();

        context.session(id, SessionSources::default()).unwrap();
        context
            .session(
                id,
                SessionSources {
                    mirror_urls: vec![mirror.clone()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(swarm.sources(&id).unwrap().mirror_urls, vec![mirror]);
    }

    #[tokio::test]
    async fn test_shutdown_releases_sessions() {
        let context = Context::memory();
        context
            .session(ContentId::of(b"content"), SessionSources::default())
            .unwrap();
        context.shutdown().await.unwrap();
        assert_eq!(context.session_count(), 0);
        assert!(context
            .session(ContentId::of(b"content"), SessionSources::default())
            .is_err());
    }
}
