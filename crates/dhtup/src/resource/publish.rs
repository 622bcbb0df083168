use super::error::{ResourceError, Step};
use super::{Identity, Resource};
use crate::record::Record;
use crate::scope::Scope;
use crate::store::StoreError;
use crate::swarm::ContentId;
use crate::target::{Salt, Target};

impl Resource {
    /// Point this resource's target at `content_id`
    ///
    /// With `autoseq` the current item is read first and the sequence
    ///  number raised to one past it. That read is best effort: when it
    ///  fails or finds nothing, `seq` is used as given. Two publishers racing
    ///  on one key can still pick the same number; the store rejects the
    ///  loser.
    ///
    /// # Returns
    /// * `Ok(target)` - The target the record was written to
    /// * `Err(ResourceError::Role)` - This is a consumer resource
    /// * `Err(ResourceError::InvalidContentId)` - `content_id` is all zeroes
    /// * `Err(ResourceError::Publish)` - The store refused the write, or did
    ///   not finish it within the lookup timeout
    /// * `Err(ResourceError::Scope)` - `scope` was cancelled or ran out first
    pub async fn publish(
        &self,
        scope: &Scope,
        name: Option<&str>,
        content_id: ContentId,
        seq: i64,
        autoseq: bool,
    ) -> Result<Target, ResourceError> {
        let (secret_key, salt) = match &self.identity {
            Identity::Publisher { secret_key, salt } => (secret_key, salt),
            Identity::Consumer { .. } => return Err(ResourceError::Role { operation: "publish" }),
        };
        let target = self.target;
        if content_id.is_zero() {
            return Err(ResourceError::InvalidContentId { target });
        }

        let seq = if autoseq {
            match self.observed_seq(scope, &target, salt).await {
                Some(observed) => seq.max(observed.saturating_add(1)),
                None => seq,
            }
        } else {
            seq
        };

        let record = Record::new(content_id, seq, name.map(str::to_string));
        let item = record
            .sign(secret_key, salt)
            .map_err(|source| ResourceError::Encode { target, source })?;

        let put = scope.child().timeout(self.context.config().lookup_timeout);
        match put.run(self.context.store().put(item)).await {
            Ok(stored) => stored.map_err(|source| ResourceError::Publish { target, source })?,
            // only the caller's own scope ending is a scope error, running
            //  out of lookup_timeout is the store being slow
            Err(e) => {
                return Err(match scope.check() {
                    Err(source) => ResourceError::Scope {
                        step: Step::Publish,
                        target,
                        source,
                    },
                    Ok(()) => {
                        tracing::debug!("publish: put at {} ended: {}", target, e);
                        ResourceError::Publish {
                            target,
                            source: StoreError::Timeout,
                        }
                    }
                });
            }
        }

        tracing::info!(
            "publish: {} -> {} at seq {}",
            target,
            content_id,
            seq
        );
        Ok(target)
    }

    /// Sequence number of the item currently stored at `target`, if one
    ///  can be read and verified
    async fn observed_seq(&self, scope: &Scope, target: &Target, salt: &Salt) -> Option<i64> {
        let lookup = scope.child().timeout(self.context.config().lookup_timeout);
        match lookup.run(self.context.store().get(target, salt)).await {
            Ok(Ok(Some(response))) => match response.item.verify_for(target) {
                Ok(()) => Some(response.item.seq()),
                Err(e) => {
                    tracing::debug!("publish: ignoring unverifiable item at {}: {}", target, e);
                    None
                }
            },
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::debug!("publish: could not read current seq at {}: {}", target, e);
                None
            }
            Err(e) => {
                tracing::debug!("publish: current seq lookup at {} ended: {}", target, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::ContextConfig;
    use crate::context::Context;
    use crate::crypto::SecretKey;
    use crate::record::SignedItem;
    use crate::scope::ScopeError;
    use crate::store::{DhtStore, GetResponse, MemoryDht};

    /// A store whose writes never complete
    #[derive(Debug)]
    struct HangingStore;

    #[async_trait]
    impl DhtStore for HangingStore {
        async fn get(&self, _: &Target, _: &Salt) -> Result<Option<GetResponse>, StoreError> {
            Ok(None)
        }

        async fn put(&self, _: SignedItem) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    fn hanging_publisher() -> Resource {
        let config = ContextConfig {
            lookup_timeout: Duration::from_secs(1),
            ..ContextConfig::default()
        };
        let context = Context::builder()
            .store(HangingStore)
            .config(config)
            .build();
        Resource::publisher(context, SecretKey::generate(), Salt::try_from("site").unwrap())
    }

    fn publisher(store: &MemoryDht) -> Resource {
        let context = Context::builder().store(store.clone()).build();
        Resource::publisher(context, SecretKey::generate(), Salt::try_from("site").unwrap())
    }

    #[tokio::test]
    async fn test_autoseq_raises_seq() {
        let store = MemoryDht::new();
        let resource = publisher(&store);
        let scope = Scope::new();
        let salt = resource.salt().clone();

        let target = resource
            .publish(&scope, None, ContentId::of(b"one"), 5, false)
            .await
            .unwrap();
        resource
            .publish(&scope, Some("two"), ContentId::of(b"two"), 0, true)
            .await
            .unwrap();

        let stored = store.get(&target, &salt).await.unwrap().unwrap();
        assert_eq!(stored.item.seq(), 6);
        let record = Record::from_item(&stored.item).unwrap();
        assert_eq!(record.content_id, ContentId::of(b"two"));
        assert_eq!(record.name.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_autoseq_keeps_higher_requested_seq() {
        let store = MemoryDht::new();
        let resource = publisher(&store);
        let scope = Scope::new();

        resource
            .publish(&scope, None, ContentId::of(b"one"), 1, false)
            .await
            .unwrap();
        let target = resource
            .publish(&scope, None, ContentId::of(b"two"), 40, true)
            .await
            .unwrap();
        let stored = store.get(&target, resource.salt()).await.unwrap().unwrap();
        assert_eq!(stored.item.seq(), 40);
    }

    #[tokio::test]
    async fn test_stale_seq_is_rejected() {
        let store = MemoryDht::new();
        let resource = publisher(&store);
        let scope = Scope::new();

        resource
            .publish(&scope, None, ContentId::of(b"one"), 3, false)
            .await
            .unwrap();
        let err = resource
            .publish(&scope, None, ContentId::of(b"two"), 2, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Publish {
                source: StoreError::SeqTooLow { seq: 2, stored: 3 },
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_zero_content_id_is_rejected() {
        let store = MemoryDht::new();
        let resource = publisher(&store);
        let err = resource
            .publish(&Scope::new(), None, ContentId::default(), 1, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::InvalidContentId { .. }));
        assert!(err.is_permanent());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_consumer_cannot_publish() {
        let context = Context::memory();
        let resource = Resource::consumer(context, Target::from_bytes([1; 20]), Salt::default());
        let err = resource
            .publish(&Scope::new(), None, ContentId::of(b"one"), 1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Role { operation: "publish" }));
    }

    #[tokio::test]
    async fn test_offline_store_fails_publish() {
        let store = MemoryDht::new();
        store.set_offline(true);
        let resource = publisher(&store);
        let err = resource
            .publish(&Scope::new(), None, ContentId::of(b"one"), 1, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_scope_aborts_publish() {
        let store = MemoryDht::new();
        let resource = publisher(&store);
        let scope = Scope::new();
        scope.cancel();
        let err = resource
            .publish(&scope, None, ContentId::of(b"one"), 1, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Scope { step: Step::Publish, .. }));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_put_is_a_store_timeout() {
        let resource = hanging_publisher();
        let err = resource
            .publish(&Scope::new(), None, ContentId::of(b"one"), 1, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Publish {
                source: StoreError::Timeout,
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_during_slow_put_is_a_scope_error() {
        let resource = hanging_publisher();
        let scope = Scope::with_timeout(Duration::from_millis(200));
        let err = resource
            .publish(&scope, None, ContentId::of(b"one"), 1, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Scope {
                step: Step::Publish,
                source: ScopeError::DeadlineExceeded,
                ..
            }
        ));
    }
}
