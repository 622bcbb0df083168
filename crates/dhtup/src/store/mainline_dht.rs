use std::collections::HashMap;

use async_trait::async_trait;
use mainline::async_dht::AsyncDht;
use mainline::{Dht, MutableItem};
use parking_lot::RwLock;

use super::{DhtStore, GetResponse, StoreError};
use crate::crypto::{PublicKey, SecretKey, Signature};
use crate::record::SignedItem;
use crate::target::{Salt, Target};

/// Builder for a [`MainlineDht`]
#[derive(Debug, Default, Clone)]
pub struct MainlineDhtBuilder {
    port: Option<u16>,
    bootstrap: Option<Vec<String>>,
    extra_bootstrap: Vec<String>,
    server_mode: bool,
    publishers: Vec<PublicKey>,
}

impl MainlineDhtBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Replace the default bootstrap nodes
    pub fn bootstrap(mut self, nodes: &[String]) -> Self {
        self.bootstrap = Some(nodes.to_vec());
        self
    }

    /// Bootstrap from these nodes as well as the defaults
    pub fn extra_bootstrap(mut self, nodes: &[String]) -> Self {
        self.extra_bootstrap.extend_from_slice(nodes);
        self
    }

    /// Answer requests from other nodes, not just make them
    pub fn server_mode(mut self, server_mode: bool) -> Self {
        self.server_mode = server_mode;
        self
    }

    pub fn publishers(mut self, publishers: impl IntoIterator<Item = PublicKey>) -> Self {
        self.publishers.extend(publishers);
        self
    }

    /// Bind the node's socket and start bootstrapping in the background
    pub fn build(self) -> Result<MainlineDht, StoreError> {
        let mut builder = Dht::builder();
        if let Some(port) = self.port {
            builder.port(port);
        }
        if let Some(bootstrap) = &self.bootstrap {
            builder.bootstrap(bootstrap);
        }
        if !self.extra_bootstrap.is_empty() {
            builder.extra_bootstrap(&self.extra_bootstrap);
        }
        if self.server_mode {
            builder.server_mode();
        }
        let dht = builder
            .build()
            .map_err(|e| StoreError::Unreachable(format!("failed to start dht node: {}", e)))?;
        tracing::info!(
            "MainlineDht::build node started (server mode: {}, {} extra bootstrap nodes)",
            self.server_mode,
            self.extra_bootstrap.len()
        );

        Ok(MainlineDht {
            dht: RwLock::new(Some(dht.as_async())),
            publishers: RwLock::new(self.publishers),
            signers: RwLock::new(HashMap::new()),
        })
    }
}

/// A [`DhtStore`] over the BitTorrent mainline DHT
///
/// The mainline client looks mutable items up by public key and salt
///  rather than by bare target, so a lookup only succeeds for targets
///  derived from a known publisher key: one handed to the builder, one
///  registered through [`DhtStore::add_publisher`], or the key of a
///  registered signer. Writes are re-signed by the mainline client and
///  need the signer registered through [`DhtStore::add_signer`].
#[derive(Debug)]
pub struct MainlineDht {
    dht: RwLock<Option<AsyncDht>>,
    publishers: RwLock<Vec<PublicKey>>,
    signers: RwLock<HashMap<PublicKey, SecretKey>>,
}

impl MainlineDht {
    pub fn builder() -> MainlineDhtBuilder {
        MainlineDhtBuilder::default()
    }

    fn client(&self) -> Result<AsyncDht, StoreError> {
        self.dht.read().clone().ok_or(StoreError::Closed)
    }

    fn publisher_of(&self, target: &Target, salt: &Salt) -> Option<PublicKey> {
        let publishers = self.publishers.read();
        let signers = self.signers.read();
        publishers
            .iter()
            .chain(signers.keys())
            .find(|key| Target::derive(key, salt) == *target)
            .copied()
    }
}

fn salt_arg(salt: &Salt) -> Option<&[u8]> {
    if salt.is_empty() {
        None
    } else {
        Some(salt.as_bytes())
    }
}

#[async_trait]
impl DhtStore for MainlineDht {
    async fn get(&self, target: &Target, salt: &Salt) -> Result<Option<GetResponse>, StoreError> {
        let dht = self.client()?;
        let public_key = self
            .publisher_of(target, salt)
            .ok_or(StoreError::UnknownPublisher(*target))?;

        let item = match dht
            .get_mutable_most_recent(&public_key.to_bytes(), salt_arg(salt))
            .await
        {
            Some(item) => item,
            None => {
                tracing::debug!("MainlineDht::get nothing stored at {}", target);
                return Ok(None);
            }
        };
        let signature = Signature::from_bytes(item.signature());
        let item = SignedItem::from_parts(
            public_key,
            salt.clone(),
            item.seq(),
            item.value().to_vec(),
            signature,
        );
        tracing::debug!("MainlineDht::get seq {} at {}", item.seq(), target);
        // the client verifies responses itself and does not report how
        //  many nodes answered
        Ok(Some(GetResponse {
            item,
            nodes_queried: 0,
        }))
    }

    async fn put(&self, item: SignedItem) -> Result<(), StoreError> {
        let dht = self.client()?;
        item.verify()?;
        let secret_key = self
            .signers
            .read()
            .get(item.public_key())
            .cloned()
            .ok_or(StoreError::UnknownPublisher(item.target()))?;

        let signing_key = mainline::SigningKey::from_bytes(&secret_key.to_bytes());
        let mutable = MutableItem::new(signing_key, item.value(), item.seq(), salt_arg(item.salt()));
        dht.put_mutable(mutable, None)
            .await
            .map_err(|e| StoreError::Default(anyhow::anyhow!("put_mutable failed: {}", e)))?;
        tracing::debug!("MainlineDht::put seq {} at {}", item.seq(), item.target());
        Ok(())
    }

    fn add_signer(&self, secret_key: &SecretKey) {
        self.signers
            .write()
            .entry(secret_key.public())
            .or_insert_with(|| secret_key.clone());
    }

    fn add_publisher(&self, public_key: &PublicKey) {
        let mut publishers = self.publishers.write();
        if !publishers.contains(public_key) {
            publishers.push(*public_key);
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.dht.write().take().is_some() {
            tracing::info!("MainlineDht::close node stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mainline::Testnet;

    use super::*;
    use crate::record::Record;
    use crate::swarm::ContentId;

    fn testnet_store(testnet: &Testnet) -> MainlineDht {
        MainlineDht::builder()
            .bootstrap(&testnet.bootstrap)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_publisher() {
        let testnet = Testnet::new(3).unwrap();
        let dht = testnet_store(&testnet);
        let target = Target::from_bytes([7; 20]);
        let err = dht.get(&target, &Salt::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownPublisher(t) if t == target));

        let item = Record::new(ContentId::of(b"a"), 1, None)
            .sign(&SecretKey::generate(), &Salt::default())
            .unwrap();
        assert!(matches!(
            dht.put(item).await,
            Err(StoreError::UnknownPublisher(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_then_get_over_testnet() {
        let testnet = Testnet::new(10).unwrap();
        let writer = testnet_store(&testnet);
        let reader = testnet_store(&testnet);

        let key = SecretKey::generate();
        let salt = Salt::try_from("site").unwrap();
        let item = Record::new(ContentId::of(b"v1"), 4, Some("v1".to_string()))
            .sign(&key, &salt)
            .unwrap();
        writer.add_signer(&key);
        writer.put(item.clone()).await.unwrap();

        reader.add_publisher(&key.public());
        let response = reader.get(&item.target(), &salt).await.unwrap().unwrap();
        assert_eq!(response.item, item);
        response.item.verify_for(&item.target()).unwrap();
    }

    #[tokio::test]
    async fn test_closed_store() {
        let testnet = Testnet::new(3).unwrap();
        let dht = testnet_store(&testnet);
        dht.close().await.unwrap();
        let key = SecretKey::generate();
        dht.add_publisher(&key.public());
        let target = Target::derive(&key.public(), &Salt::default());
        assert!(matches!(
            dht.get(&target, &Salt::default()).await,
            Err(StoreError::Closed)
        ));
    }
}
