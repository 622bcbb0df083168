//! Distributed store boundary
//!
//! Everything this crate needs from a DHT is a get and a put of BEP-44
//!  mutable items addressed by [`Target`]. Routing, node discovery and the
//!  KRPC wire format live behind [`DhtStore`] implementations:
//!  [`MainlineDht`] over the BitTorrent mainline DHT, and [`MemoryDht`]
//!  for tests and single-process setups.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::crypto::{PublicKey, SecretKey};
use crate::record::{RecordError, SignedItem};
use crate::target::{Salt, Target};

mod mainline_dht;
mod memory;

pub use mainline_dht::{MainlineDht, MainlineDhtBuilder};
pub use memory::MemoryDht;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("dht unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("sequence number {seq} is not newer than stored {stored}")]
    SeqTooLow { seq: i64, stored: i64 },
    #[error("item rejected: {0}")]
    Rejected(#[from] RecordError),
    #[error("no known publisher key derives target {0}")]
    UnknownPublisher(Target),
    #[error("store is closed")]
    Closed,
}

/// Most recent item returned by a lookup
#[derive(Debug, Clone)]
pub struct GetResponse {
    pub item: SignedItem,
    /// Number of nodes that answered the lookup
    pub nodes_queried: usize,
}

#[async_trait]
pub trait DhtStore: Send + Sync + Debug + 'static {
    /// Look up the most recent item stored at `target`
    ///
    /// # Returns
    /// * `Ok(Some(response))` - The newest item any queried node held
    /// * `Ok(None)` - No node holds an item for the target
    /// * `Err(StoreError)` - The lookup itself failed
    async fn get(&self, target: &Target, salt: &Salt) -> Result<Option<GetResponse>, StoreError>;

    /// Store an item at its target
    ///
    /// Should fail with `StoreError::SeqTooLow` when a node already holds
    ///  a newer item, and with `StoreError::Rejected` for items that do not
    ///  verify.
    async fn put(&self, item: SignedItem) -> Result<(), StoreError>;

    /// Make `secret_key` available to stores that sign writes themselves
    fn add_signer(&self, _secret_key: &SecretKey) {}

    /// Make `public_key` available to stores that look items up by key
    ///  rather than by target
    fn add_publisher(&self, _public_key: &PublicKey) {}

    /// Release sockets and background tasks
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
