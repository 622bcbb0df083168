/**
 * Configuration of a shared context,
 *  loadable from TOML.
 */
pub mod config;
/**
 * The process-wide context: store, swarm client
 *  and the registry of swarm sessions.
 */
pub mod context;
/**
 * Ed25519 signing keys and signatures.
 */
pub mod crypto;
/**
 * Periodic re-resolution of a resource,
 *  with backoff driven by failure class.
 */
pub mod poll;
/**
 * Record payloads and BEP-44 signed items.
 */
pub mod record;
/**
 * Publishing and resolving named resources.
 */
pub mod resource;
/**
 * Cancellation and deadlines.
 */
pub mod scope;
/**
 * DHT store boundary, the mainline store
 *  and an in-memory store.
 */
pub mod store;
/**
 * Content swarm boundary: manifests, content ids,
 *  and the in-memory and iroh-blobs clients.
 */
pub mod swarm;
/**
 * Lookup targets and salts.
 */
pub mod target;

pub use context::Context;
pub use resource::{FailureClass, Resource, ResourceError};
pub use scope::Scope;

pub mod prelude {
    pub use crate::config::ContextConfig;
    pub use crate::context::{Context, ContextBuilder, ContextError};
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::poll::{PollConfig, PollEvent, PollTrigger, Poller};
    pub use crate::record::{Record, SignedItem};
    pub use crate::resource::{
        FailureClass, Fetched, Identity, OpenedResource, Resource, ResourceError,
    };
    pub use crate::scope::{Scope, ScopeError};
    pub use crate::store::{DhtStore, MainlineDht, MemoryDht};
    pub use crate::swarm::{ContentId, IrohSwarm, MemorySwarm, SwarmClient};
    pub use crate::target::{Salt, Target};
}
