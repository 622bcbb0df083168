use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    manifest_for, ContentId, ContentManifest, FileEntry, FileReader, SessionSources, SwarmClient,
    SwarmError, SwarmSession,
};

type ContentSlot = Option<Arc<SeededContent>>;

/// In-process swarm for tests
///
/// Content becomes visible to every session the moment it is seeded;
///  sessions for content nobody seeded wait for it indefinitely. The
///  swarm remembers how many sessions were opened and which sources
///  each content id was handed.
#[derive(Debug, Clone, Default)]
pub struct MemorySwarm {
    inner: Arc<MemorySwarmInner>,
}

#[derive(Debug, Default)]
struct MemorySwarmInner {
    content: Mutex<HashMap<ContentId, watch::Sender<ContentSlot>>>,
    sources: Mutex<HashMap<ContentId, SessionSources>>,
    sessions_opened: AtomicUsize,
    shut_down: AtomicBool,
}

#[derive(Debug)]
struct SeededContent {
    manifest: ContentManifest,
    blobs: HashMap<ContentId, Bytes>,
}

impl MemorySwarmInner {
    fn slot(&self, content_id: ContentId) -> watch::Receiver<ContentSlot> {
        self.content
            .lock()
            .entry(content_id)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}

impl MemorySwarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions created over the swarm's lifetime
    pub fn sessions_opened(&self) -> usize {
        self.inner.sessions_opened.load(Ordering::SeqCst)
    }

    /// Every source handed to the session for `content_id` so far
    pub fn sources(&self, content_id: &ContentId) -> Option<SessionSources> {
        self.inner.sources.lock().get(content_id).cloned()
    }
}

#[async_trait]
impl SwarmClient for MemorySwarm {
    fn open_session(
        &self,
        content_id: ContentId,
        sources: SessionSources,
    ) -> Result<Arc<dyn SwarmSession>, SwarmError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(SwarmError::Shutdown);
        }
        self.inner.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.inner
            .sources
            .lock()
            .entry(content_id)
            .or_default()
            .merge(sources);

        Ok(Arc::new(MemorySession {
            content_id,
            slot: self.inner.slot(content_id),
            swarm: self.inner.clone(),
        }))
    }

    async fn seed(&self, files: Vec<(String, Bytes)>) -> Result<ContentId, SwarmError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(SwarmError::Shutdown);
        }
        let manifest = manifest_for(&files)?;
        let content_id = manifest.content_id()?;
        let blobs = files
            .into_iter()
            .map(|(_, data)| (ContentId::of(&data), data))
            .collect();

        let content = Arc::new(SeededContent { manifest, blobs });
        self.inner
            .content
            .lock()
            .entry(content_id)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(content));

        tracing::debug!("memory swarm: seeded {}", content_id);
        Ok(content_id)
    }

    async fn shutdown(&self) -> Result<(), SwarmError> {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        // dropping the senders wakes every session still waiting
        self.inner.content.lock().clear();
        Ok(())
    }
}

#[derive(Debug)]
struct MemorySession {
    content_id: ContentId,
    slot: watch::Receiver<ContentSlot>,
    swarm: Arc<MemorySwarmInner>,
}

impl MemorySession {
    async fn content(&self) -> Result<Arc<SeededContent>, SwarmError> {
        let mut slot = self.slot.clone();
        let content = slot
            .wait_for(|content| content.is_some())
            .await
            .map_err(|_| SwarmError::Shutdown)?
            .clone();
        content.ok_or(SwarmError::Unavailable(self.content_id))
    }
}

#[async_trait]
impl SwarmSession for MemorySession {
    fn content_id(&self) -> ContentId {
        self.content_id
    }

    fn add_sources(&self, sources: SessionSources) {
        self.swarm
            .sources
            .lock()
            .entry(self.content_id)
            .or_default()
            .merge(sources);
    }

    async fn manifest(&self) -> Result<ContentManifest, SwarmError> {
        Ok(self.content().await?.manifest.clone())
    }

    async fn open_file(&self, entry: &FileEntry) -> Result<FileReader, SwarmError> {
        let content = self.content().await?;
        let data = content
            .blobs
            .get(&entry.hash)
            .cloned()
            .ok_or(SwarmError::Unavailable(entry.hash))?;
        Ok(Box::new(Cursor::new(data)))
    }
}
