//! Metadata store abstraction and PostgreSQL implementation for Berth.
//!
//! This crate provides the control-plane data model:
//! - Users and organizations mirrored from the identity provider
//! - Registries (tenant namespaces) and repositories
//! - The manifest index: references, bodies, and blob dependencies
//! - API keys with encrypted secrets and permission scopes
//! - The GC index and per-registry referenced-bytes cache

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use store::MetadataStore;
