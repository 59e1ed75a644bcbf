//! Client code for versync.
//!
//! This crate provides the persistent client record store and the client side
//! of the version-stamped read protocol.

pub mod error;
pub mod record;
pub mod store;
pub mod sync;

pub use error::ClientError;
pub use record::{ClientCacheRecord, ClientTtl, UserScope, storage_key};
pub use store::{ClientCacheStore, StorageEvent};
pub use sync::{SyncClient, SyncedView, ViewSource};
