use super::error::{ResourceError, Step};
use super::opened::OpenedResource;
use super::{Fetched, Resource};
use crate::record::Record;
use crate::scope::Scope;

impl Resource {
    /// Look up and verify the record currently stored at the target
    ///
    /// Bounded by the context's lookup timeout as well as `scope`.
    pub async fn fetch_record(&self, scope: &Scope) -> Result<Record, ResourceError> {
        let target = self.target;
        let lookup = scope.child().timeout(self.context.config().lookup_timeout);
        let response = lookup
            .run(self.context.store().get(&target, self.salt()))
            .await
            .map_err(|source| ResourceError::Scope {
                step: Step::FetchRecord,
                target,
                source,
            })?
            .map_err(|source| ResourceError::Lookup {
                target,
                source: Some(source),
            })?
            .ok_or(ResourceError::Lookup {
                target,
                source: None,
            })?;
        tracing::debug!(
            "fetch_record: found seq {} at {} ({} nodes)",
            response.item.seq(),
            target,
            response.nodes_queried
        );

        response
            .item
            .verify_for(&target)
            .map_err(|source| ResourceError::Verify { target, source })?;
        Record::from_item(&response.item).map_err(|source| ResourceError::Decode { target, source })
    }

    /// Resolve the target to the configured file and open it
    ///
    /// The returned handle stays bound to `scope`: reads fail once it is
    ///  cancelled or past its deadline. Nothing is retried here, callers
    ///  decide from [`ResourceError::failure_class`].
    pub async fn open(&self, scope: &Scope) -> Result<OpenedResource, ResourceError> {
        let record = self.fetch_record(scope).await?;
        self.open_record(scope, record).await
    }

    /// Follow an already fetched `record` into the swarm
    pub(crate) async fn open_record(
        &self,
        scope: &Scope,
        record: Record,
    ) -> Result<OpenedResource, ResourceError> {
        let target = self.target;
        let content_id = record.content_id;

        let session = self
            .context
            .session(content_id, self.sources())
            .map_err(|source| ResourceError::Swarm {
                step: Step::ResolveContent,
                content_id,
                source,
            })?;

        let wait = scope.child().timeout(self.context.config().manifest_timeout);
        let manifest = wait
            .run(session.manifest())
            .await
            .map_err(|source| ResourceError::Scope {
                step: Step::AwaitManifest,
                target,
                source,
            })?
            .map_err(|source| ResourceError::Swarm {
                step: Step::AwaitManifest,
                content_id,
                source,
            })?;

        let entry = match manifest.find(&self.file_path) {
            Some(entry) => entry.clone(),
            None => {
                tracing::warn!(
                    "open: {} not found in {} ({} files), waiting for a re-publish",
                    self.file_path,
                    content_id,
                    manifest.files().len()
                );
                return Err(ResourceError::NotFound {
                    path: self.file_path.clone(),
                    content_id,
                });
            }
        };

        let reader = scope
            .run(session.open_file(&entry))
            .await
            .map_err(|source| ResourceError::Scope {
                step: Step::OpenFile,
                target,
                source,
            })?
            .map_err(|source| ResourceError::Swarm {
                step: Step::OpenFile,
                content_id,
                source,
            })?;
        tracing::debug!(
            "open: {} of {} at seq {} ({} bytes)",
            entry.path,
            content_id,
            record.seq,
            entry.size
        );
        Ok(OpenedResource::new(reader, scope, target, record, entry))
    }

    /// Open the file and read it to the end
    pub async fn fetch(&self, scope: &Scope) -> Result<Fetched, ResourceError> {
        let mut opened = self.open(scope).await?;
        let data = opened.read_all().await?;
        Ok(Fetched {
            record: opened.record().clone(),
            path: opened.path().to_string(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::config::ContextConfig;
    use crate::context::Context;
    use crate::crypto::SecretKey;
    use crate::record::{RecordError, SignedItem};
    use crate::resource::FailureClass;
    use crate::scope::ScopeError;
    use crate::store::MemoryDht;
    use crate::swarm::{ContentId, MemorySwarm};
    use crate::target::{Salt, Target};

    struct Fixture {
        store: MemoryDht,
        swarm: MemorySwarm,
        context: Context,
        key: SecretKey,
        salt: Salt,
    }

    impl Fixture {
        fn new() -> Self {
            let store = MemoryDht::new();
            let swarm = MemorySwarm::new();
            let context = Context::builder()
                .store(store.clone())
                .swarm(swarm.clone())
                .build();
            Self {
                store,
                swarm,
                context,
                key: SecretKey::generate(),
                salt: Salt::try_from("site").unwrap(),
            }
        }

        fn publisher(&self) -> Resource {
            Resource::publisher(self.context.clone(), self.key.clone(), self.salt.clone())
                .with_file_path("global.json")
        }

        fn consumer(&self) -> Resource {
            Resource::consumer(
                self.context.clone(),
                Target::derive(&self.key.public(), &self.salt),
                self.salt.clone(),
            )
            .with_file_path("global.json")
        }
    }

    #[tokio::test]
    async fn test_fetch_record_missing_is_transient() {
        let fixture = Fixture::new();
        let err = fixture
            .consumer()
            .fetch_record(&Scope::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Lookup { source: None, .. }));
        assert_eq!(err.failure_class(), FailureClass::Transient);
    }

    #[tokio::test]
    async fn test_fetch_record_rejects_foreign_item() {
        let fixture = Fixture::new();
        let consumer = fixture.consumer();
        // an item signed by another key, planted at our target
        let forged = Record::new(ContentId::of(b"evil"), 9, None)
            .sign(&SecretKey::generate(), &fixture.salt)
            .unwrap();
        fixture.store.insert_unchecked(consumer.target(), forged);

        let err = consumer.fetch_record(&Scope::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Verify {
                source: RecordError::TargetMismatch { .. },
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_record_malformed_value() {
        let fixture = Fixture::new();
        let consumer = fixture.consumer();
        let item = SignedItem::sign(&fixture.key, fixture.salt.clone(), 1, b"garbage".to_vec());
        fixture.store.insert_unchecked(consumer.target(), item);

        let err = consumer.fetch_record(&Scope::new()).await.unwrap_err();
        assert!(matches!(err, ResourceError::Decode { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_open_reads_published_file() {
        let fixture = Fixture::new();
        let scope = Scope::new();
        let content_id = fixture
            .context
            .seed(vec![
                ("global.json".to_string(), Bytes::from_static(b"{\"v\":1}")),
                ("other.json".to_string(), Bytes::from_static(b"{}")),
            ])
            .await
            .unwrap();
        fixture
            .publisher()
            .publish(&scope, Some("v1"), content_id, 1, true)
            .await
            .unwrap();

        let fetched = fixture.consumer().fetch(&scope).await.unwrap();
        assert_eq!(fetched.data.as_ref(), b"{\"v\":1}");
        assert_eq!(fetched.record.content_id, content_id);
        assert_eq!(fetched.record.name.as_deref(), Some("v1"));
        assert_eq!(fetched.path, "global.json");

        // the publisher resolves its own target too
        let own = fixture.publisher().fetch(&scope).await.unwrap();
        assert_eq!(own.data, fetched.data);
        assert_eq!(fixture.context.session_count(), 1);
        assert_eq!(fixture.swarm.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn test_open_missing_file_is_permanent() {
        let fixture = Fixture::new();
        let scope = Scope::new();
        let content_id = fixture
            .context
            .seed(vec![("other.json".to_string(), Bytes::from_static(b"{}"))])
            .await
            .unwrap();
        fixture
            .publisher()
            .publish(&scope, None, content_id, 1, false)
            .await
            .unwrap();

        let err = fixture.consumer().open(&scope).await.unwrap_err();
        assert!(matches!(err, ResourceError::NotFound { ref path, .. } if path == "global.json"));
        assert_eq!(err.failure_class(), FailureClass::Permanent);
    }

    #[tokio::test]
    async fn test_open_hands_sources_to_session() {
        let fixture = Fixture::new();
        let scope = Scope::new();
        let content_id = fixture
            .context
            .seed(vec![("global.json".to_string(), Bytes::from_static(b"{}"))])
            .await
            .unwrap();
        fixture
            .publisher()
            .publish(&scope, None, content_id, 1, false)
            .await
            .unwrap();

        let mirror = url::Url::parse("https://mirror.example/site/").unwrap();
        fixture
            .consumer()
            .with_mirror_urls([mirror.clone()])
            .fetch(&scope)
            .await
            .unwrap();
        let sources = fixture.swarm.sources(&content_id).unwrap();
        assert_eq!(
            sources.trusted_peers,
            vec![fixture.context.config().loopback_peer]
        );
        assert_eq!(sources.mirror_urls, vec![mirror]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unseeded_content_hits_deadline() {
        let fixture = Fixture::new();
        fixture
            .publisher()
            .publish(&Scope::new(), None, ContentId::of(b"never seeded"), 1, false)
            .await
            .unwrap();

        let scope = Scope::with_timeout(Duration::from_secs(2));
        let err = fixture.consumer().open(&scope).await.unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Scope {
                step: Step::AwaitManifest,
                source: ScopeError::DeadlineExceeded,
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unbounded_lookup_timeout_from_config() {
        let config = ContextConfig::from_toml("lookup_timeout = 9223372036854775807").unwrap();
        let context = Context::builder().config(config).build();
        let key = SecretKey::generate();
        let salt = Salt::try_from("site").unwrap();
        let consumer = Resource::consumer_of(context.clone(), &key.public(), salt.clone());

        let err = consumer.fetch_record(&Scope::new()).await.unwrap_err();
        assert!(matches!(err, ResourceError::Lookup { source: None, .. }));

        Resource::publisher(context, key, salt)
            .publish(&Scope::new(), None, ContentId::of(b"c"), 1, true)
            .await
            .unwrap();
        assert_eq!(consumer.fetch_record(&Scope::new()).await.unwrap().seq, 1);
    }
}
