//! Cache administration tools.
//!
//! This module provides tools for invalidating and purging the shared store.

pub mod invalidate;
pub mod purge;

pub use invalidate::{CacheInvalidateParams, invalidate_impl};
pub use purge::purge_impl;
