//! Core use-case services.
//!
//! # Responsibility
//! - Assemble snapshots from repository state and reconcile incoming
//!   snapshots back into it.
//! - Keep CLI callers decoupled from storage keys and record shapes.

pub mod backup;
pub mod export_service;
pub mod import_service;
pub mod merge;
pub mod protocol_bundle;
pub mod validate;
