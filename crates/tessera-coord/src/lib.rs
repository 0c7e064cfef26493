//! Tessera coordination cache
//!
//! A process-local, watch-driven cache of immutable snapshots of
//! hierarchical coordination paths. Populating reads install watches; the
//! watch channel's events are the only thing that mutates cached state.
//! Negative results are cached too — safe because the absence slot was
//! established by a probe that armed the creation watch.
//!
//! The coordination store itself is reached through the CoordClient trait;
//! this crate never links a particular client library.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod watch;

// Re-export key types for convenience
pub use cache::CoordCache;
pub use client::{CoordClient, Stat};
pub use config::CoordConfig;
pub use error::{CoordError, CoordResult};
pub use registry::CacheRegistry;
pub use watch::{NodeEventKind, SessionEventKind, WatchChannel, WatchEvent, Watcher};
