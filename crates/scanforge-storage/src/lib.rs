//! Persistence gateway for the scanforge backend.
//!
//! The [`Store`] trait is the typed entity API every other crate writes
//! through; [`MemoryStore`] backs tests and single-process deployments,
//! [`PostgresStore`] is the production gateway. The [`EncryptionService`]
//! encrypts credential plaintext before it ever reaches a store.

pub mod encryption;
pub mod memory;
pub mod postgres;
pub mod store;

pub use encryption::{generate_encryption_key, EncryptionService};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use store::{Store, StoreError};
