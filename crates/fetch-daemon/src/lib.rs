//! fetch daemon - disk-backed read-through cache in front of an origin
//!
//! This crate provides:
//! - A bounded on-disk cache store with GreedyDual-Size-Frequency eviction
//! - Origins (local directory, S3-compatible bucket, in-memory)
//! - A cloneable, sharded cache handle for threads and async tasks
//! - An HTTP front end serving cached files
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Callers (HTTP handlers, threads, async tasks)        │
//! │  Cache::open blocks until the store hands back a lease      │
//! └─────────────────────────────┬───────────────────────────────┘
//!                               │ crossbeam-channel
//!                               │ (bounded, backpressure)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Store workers (one thread per shard)           │
//! │  - index, eviction heap, logical clock, capacity            │
//! │  - fetch misses from the origin into <root>/.incoming       │
//! │  - evict only entries nobody is reading                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads never go through the worker: a [`CachedFile`] holds a shared lock
//! on its entry's file and reads it directly.

pub mod entry;
pub mod facade;
pub mod origin;
pub mod priority_queue;
pub mod server;
pub mod store;

pub use entry::CachedFile;
pub use facade::Cache;
pub use origin::{DirOrigin, MemoryOrigin, Origin, OriginObject, S3Origin};
pub use priority_queue::{EntryId, HeapSlots, PriorityQueue};
pub use server::{create_app, serve};
pub use store::{CacheStore, StoreRequest, STAGING_DIR};
