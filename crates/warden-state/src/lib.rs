//! warden-state — embedded state store for the Warden control plane.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the append-only chaos
//! event log, the history of applied scaling actions, and a bounded window
//! of recent metrics snapshots.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns. Keys
//! start with a zero-padded timestamp so a forward scan is chronological
//! and a reverse scan yields the newest entries first.
//!
//! The whole store can be exported to a [`StateSnapshot`] and imported back,
//! which is how the recovery orchestrator backs it up and restores it
//! without touching the open database file.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{StateSnapshot, StateStore};
