//! Core types and shared functionality for versync.
//!
//! This crate provides:
//! - Version registry and payload cache over a shared remote store
//! - The version-stamped read protocol and the write-side invalidation cascade
//! - Resource key derivation and the entity dependency graph
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod cascade;
pub mod config;
pub mod error;
pub mod graph;
pub mod keys;
pub mod migrate;
pub mod registry;
pub mod store;
pub mod sync;

pub use cache::ResourceCache;
pub use cascade::{CascadeReport, InvalidationCascade, InvalidationPlan};
pub use config::{AppConfig, StoreBackend};
pub use error::Error;
pub use graph::{Change, DependencyGraph, EntityKind};
pub use keys::{ClientPolicy, Resource};
pub use registry::{INITIAL_VERSION, UNKNOWN_VERSION, VersionRegistry};
pub use store::{RemoteStore, StoreHandle};
pub use sync::{ApiResponse, ApiStatus, Committed, ResourceReader, ResourceSource, SyncEndpoint, SyncOutcome, SyncService};
