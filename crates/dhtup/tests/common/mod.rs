//! Shared test utilities for resource integration tests
#![allow(dead_code)]

use bytes::Bytes;
use dhtup::crypto::SecretKey;
use dhtup::store::MemoryDht;
use dhtup::swarm::{ContentId, MemorySwarm};
use dhtup::target::{Salt, Target};
use dhtup::{Context, Resource, Scope};

pub const FILE_PATH: &str = "global.json";

/// Route crate logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory network: one store and one swarm, shared by every
///  context built from it
pub struct TestNet {
    pub store: MemoryDht,
    pub swarm: MemorySwarm,
}

impl TestNet {
    pub fn new() -> Self {
        init_tracing();
        Self {
            store: MemoryDht::new(),
            swarm: MemorySwarm::new(),
        }
    }

    pub fn context(&self) -> Context {
        Context::builder()
            .store(self.store.clone())
            .swarm(self.swarm.clone())
            .build()
    }
}

/// A publisher and a consumer of the same target
pub struct Pair {
    pub key: SecretKey,
    pub salt: Salt,
    pub publisher: Resource,
    pub consumer: Resource,
}

pub fn setup_pair(net: &TestNet, salt: &str) -> Pair {
    let key = SecretKey::generate();
    let salt = Salt::try_from(salt).unwrap();
    let context = net.context();
    let publisher =
        Resource::publisher(context.clone(), key.clone(), salt.clone()).with_file_path(FILE_PATH);
    let consumer = Resource::consumer(
        context,
        Target::derive(&key.public(), &salt),
        salt.clone(),
    )
    .with_file_path(FILE_PATH);
    Pair {
        key,
        salt,
        publisher,
        consumer,
    }
}

/// Seed `data` as the resource file and publish it with autoseq
pub async fn seed_and_publish(pair: &Pair, data: &'static [u8]) -> ContentId {
    let content_id = pair
        .publisher
        .context()
        .seed(vec![(FILE_PATH.to_string(), Bytes::from_static(data))])
        .await
        .unwrap();
    pair.publisher
        .publish(&Scope::new(), None, content_id, 0, true)
        .await
        .unwrap();
    content_id
}
