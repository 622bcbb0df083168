//! Publishing identity
//!
//! Records are authenticated with Ed25519, as BEP-44 mutable items are.
//! A publisher holds a [`SecretKey`] seed; consumers only ever see the
//! [`PublicKey`] embedded in a fetched item.

mod keys;

pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
