//! Repository layer over the key-value store.
//!
//! # Responsibility
//! - Map entity kinds and optional project ids onto collection keys.
//! - Serialize whole collections to and from their stored JSON arrays.
//!
//! # Invariants
//! - `save` replaces the entire collection stored under one key.
//! - There is no cross-kind atomicity; callers order writes themselves.

pub mod entity_repo;

pub use entity_repo::{EntityRepository, RepoError, RepoResult};
