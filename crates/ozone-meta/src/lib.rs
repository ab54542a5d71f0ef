//! Ozone Metadata Store: embedded ordered key/value storage backed by redb.
//!
//! Both SCM and KSM persist their metadata through this crate. Keys are
//! ordered lexicographically on bytes, single puts are durable before they
//! return, and multi-key mutations go through an atomic batch.

pub mod store;

pub use store::{BatchOp, MetaIterator, MetaStore, MetaStoreError, MetaStoreResult};
