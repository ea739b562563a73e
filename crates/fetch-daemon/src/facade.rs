//! Cache handle shared by callers
//!
//! # Design
//!
//! ```text
//! Caller threads / tasks           Store workers (one per shard)
//! ──────────────────────           ─────────────────────────────
//!     │                                   │
//!     │  StoreRequest + reply Sender      │
//!     ├──────────────────────────────────►│  open / stats / inspect
//!     │      (crossbeam bounded)          │  one request at a time
//!     │                                   │
//!     │◄──────────[blocks]────────────────┤
//!     │      reply Receiver (bounded 1)   │
//! ```
//!
//! A name always maps to the same shard through its blake3 hash, so each
//! shard is an independent store with `capacity / shards` bytes. A full
//! request queue blocks the caller (backpressure); the optional timeout
//! bounds both the enqueue and the wait for the reply. Async callers go
//! through `spawn_blocking` so the runtime never parks on a channel.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use fetch_core::{validate_name, CacheConfig, CacheError, CacheStats, EntryInfo};

use crate::entry::CachedFile;
use crate::origin::Origin;
use crate::store::{CacheStore, StoreRequest};

/// Cloneable handle to a set of cache stores
#[derive(Clone)]
pub struct Cache {
    shards: Arc<[Sender<StoreRequest>]>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("shards", &self.shards.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Cache {
    /// Start one worker thread per store
    pub fn spawn(
        stores: Vec<CacheStore>,
        queue_depth: usize,
        timeout: Option<Duration>,
    ) -> io::Result<(Self, Vec<JoinHandle<()>>)> {
        let mut senders = Vec::with_capacity(stores.len());
        let mut workers = Vec::with_capacity(stores.len());

        for (i, store) in stores.into_iter().enumerate() {
            let (tx, rx): (Sender<StoreRequest>, Receiver<StoreRequest>) =
                bounded(queue_depth.max(1));
            let worker = thread::Builder::new()
                .name(format!("fetch-store-{}", i))
                .spawn(move || store.run(rx))?;
            senders.push(tx);
            workers.push(worker);
        }

        if senders.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "at least one cache store is required",
            ));
        }

        Ok((
            Self {
                shards: senders.into(),
                timeout,
            },
            workers,
        ))
    }

    /// Build and start the stores described by `config` under `root`
    ///
    /// A single shard uses `root` directly, otherwise shard `i` lives in
    /// `root/shard-i`.
    pub fn from_config(
        config: &CacheConfig,
        root: &Path,
        origin: Arc<dyn Origin>,
    ) -> Result<(Self, Vec<JoinHandle<()>>), CacheError> {
        let shards = config.shards.max(1);
        let capacity = config.capacity_bytes / shards as u64;

        let stores = (0..shards)
            .map(|i| {
                let shard_root = if shards == 1 {
                    root.to_path_buf()
                } else {
                    root.join(format!("shard-{}", i))
                };
                CacheStore::new(shard_root, capacity, origin.clone(), config.clear_on_start)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Starting {} cache store(s) of {} bytes under {:?}",
            shards, capacity, root
        );

        Self::spawn(stores, config.queue_depth, config.request_timeout())
            .map_err(|e| CacheError::storage(&root.display().to_string(), e))
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index responsible for `name`
    pub fn shard_for(&self, name: &str) -> usize {
        let hash = blake3::hash(name.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % self.shards.len() as u64) as usize
    }

    /// Open `name`, blocking until the store replies
    pub fn open(&self, name: &str) -> Result<CachedFile, CacheError> {
        validate_name(name)?;

        let (reply, rx) = bounded(1);
        self.send(
            self.shard_for(name),
            StoreRequest::Open {
                name: name.to_string(),
                reply,
            },
        )?;
        self.recv(rx, name)?
    }

    /// Open `name` from async code
    pub async fn open_async(&self, name: &str) -> Result<CachedFile, CacheError> {
        let cache = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || cache.open(&name))
            .await
            .map_err(|e| {
                error!("open task failed: {}", e);
                CacheError::Shutdown
            })?
    }

    /// Accounting summed over every shard
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut total = CacheStats::default();
        for shard in 0..self.shards.len() {
            let (reply, rx) = bounded(1);
            self.send(shard, StoreRequest::Stats { reply })?;
            total += &self.recv(rx, "stats")?;
        }
        Ok(total)
    }

    /// Eviction metadata for a resident entry
    pub fn entry_info(&self, name: &str) -> Result<Option<EntryInfo>, CacheError> {
        let (reply, rx) = bounded(1);
        self.send(
            self.shard_for(name),
            StoreRequest::Inspect {
                name: name.to_string(),
                reply,
            },
        )?;
        self.recv(rx, name)
    }

    /// Ask every worker to stop after the requests already queued
    pub fn shutdown(&self) {
        debug!("shutting down {} cache store(s)", self.shards.len());
        for tx in self.shards.iter() {
            let _ = tx.send(StoreRequest::Shutdown);
        }
    }

    fn send(&self, shard: usize, request: StoreRequest) -> Result<(), CacheError> {
        let tx = &self.shards[shard];
        match self.timeout {
            Some(timeout) => tx.send_timeout(request, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => {
                    warn!("cache store {} queue full for {:?}", shard, timeout);
                    CacheError::Timeout
                }
                SendTimeoutError::Disconnected(_) => CacheError::Shutdown,
            }),
            None => tx.send(request).map_err(|_| CacheError::Shutdown),
        }
    }

    fn recv<T>(&self, rx: Receiver<T>, op: &str) -> Result<T, CacheError> {
        match self.timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => {
                    warn!("no reply for {} after {:?}", op, timeout);
                    CacheError::Timeout
                }
                RecvTimeoutError::Disconnected => CacheError::Shutdown,
            }),
            None => rx.recv().map_err(|_| CacheError::Shutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Barrier;

    use fetch_core::OriginError;
    use tempfile::TempDir;

    use crate::origin::{MemoryOrigin, OriginObject};

    fn start(
        capacity: u64,
        shards: usize,
        origin: Arc<dyn Origin>,
    ) -> (TempDir, Cache, Vec<JoinHandle<()>>) {
        let temp_dir = TempDir::new().unwrap();
        let config = CacheConfig {
            capacity_bytes: capacity,
            shards,
            request_timeout_secs: 5,
            ..Default::default()
        };
        let (cache, workers) = Cache::from_config(&config, temp_dir.path(), origin).unwrap();
        (temp_dir, cache, workers)
    }

    fn stop(cache: Cache, workers: Vec<JoinHandle<()>>) {
        cache.shutdown();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_open_reads_origin_bytes() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert("a.txt", "hello");
        let (_dir, cache, workers) = start(1000, 1, origin);

        let mut file = cache.open("a.txt").unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");

        stop(cache, workers);
    }

    #[test]
    fn test_not_found_and_invalid() {
        let (_dir, cache, workers) = start(1000, 1, Arc::new(MemoryOrigin::new()));

        assert!(cache.open("missing").unwrap_err().is_not_found());
        assert!(matches!(
            cache.open("a/b"),
            Err(CacheError::InvalidName { .. })
        ));
        assert_eq!(cache.stats().unwrap().entries, 0);

        stop(cache, workers);
    }

    #[test]
    fn test_concurrent_opens_share_one_entry() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert("shared", vec![7u8; 4096]);
        let (_dir, cache, workers) = start(1 << 20, 1, origin.clone());

        cache.open("shared").unwrap().close();

        let opened = Arc::new(Barrier::new(11));
        let release = Arc::new(Barrier::new(11));
        let readers: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                let opened = opened.clone();
                let release = release.clone();
                thread::spawn(move || {
                    let mut file = cache.open("shared").unwrap();
                    opened.wait();
                    let mut data = Vec::new();
                    file.read_to_end(&mut data).unwrap();
                    release.wait();
                    drop(file);
                    data
                })
            })
            .collect();

        // Every reader holds its lease here
        opened.wait();
        let info = cache.entry_info("shared").unwrap().unwrap();
        assert_eq!(info.frequency, 11);
        release.wait();

        for reader in readers {
            assert_eq!(reader.join().unwrap(), vec![7u8; 4096]);
        }
        assert_eq!(origin.get_count(), 1);

        stop(cache, workers);
    }

    #[test]
    fn test_shards_split_capacity_and_route_by_name() {
        let origin = Arc::new(MemoryOrigin::new());
        let names: Vec<String> = (0..32).map(|i| format!("obj-{}", i)).collect();
        for name in &names {
            origin.insert(name.clone(), vec![1u8; 10]);
        }
        let (dir, cache, workers) = start(4000, 4, origin.clone());
        assert_eq!(cache.shard_count(), 4);

        for name in &names {
            cache.open(name).unwrap();
            let shard = cache.shard_for(name);
            assert_eq!(cache.shard_for(name), shard);
            assert!(dir.path().join(format!("shard-{}", shard)).join(name).is_file());
        }
        for name in &names {
            cache.open(name).unwrap();
        }

        let stats = cache.stats().unwrap();
        assert_eq!(stats.capacity, 4000);
        assert_eq!(stats.entries, 32);
        assert_eq!(stats.used, 320);
        assert_eq!(stats.hits, 32);
        assert_eq!(stats.misses, 32);
        assert_eq!(origin.get_count(), 32);

        stop(cache, workers);
    }

    /// Sleeps before answering
    struct SlowOrigin(Duration);

    impl Origin for SlowOrigin {
        fn get(&self, _name: &str) -> Result<OriginObject, OriginError> {
            thread::sleep(self.0);
            Ok(OriginObject::new(1, io::Cursor::new(vec![0u8])))
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    #[test]
    fn test_open_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let origin = Arc::new(SlowOrigin(Duration::from_millis(300)));
        let store = CacheStore::new(temp_dir.path(), 100, origin, true).unwrap();
        let (cache, workers) =
            Cache::spawn(vec![store], 4, Some(Duration::from_millis(20))).unwrap();

        assert!(matches!(cache.open("slow"), Err(CacheError::Timeout)));

        stop(cache, workers);
    }

    /// Parks every `get` until the gate sender is dropped
    struct GatedOrigin {
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl Origin for GatedOrigin {
        fn get(&self, _name: &str) -> Result<OriginObject, OriginError> {
            let _ = self.entered.send(());
            let _ = self.gate.recv();
            Ok(OriginObject::new(1, io::Cursor::new(vec![0u8])))
        }

        fn describe(&self) -> String {
            "gated".into()
        }
    }

    #[test]
    fn test_full_queue_blocks_caller() {
        let temp_dir = TempDir::new().unwrap();
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let origin = Arc::new(GatedOrigin {
            entered: entered_tx,
            gate: gate_rx,
        });
        let store = CacheStore::new(temp_dir.path(), 100, origin, true).unwrap();
        let (cache, workers) = Cache::spawn(vec![store], 1, None).unwrap();

        // Worker parked inside the origin
        let first = {
            let cache = cache.clone();
            thread::spawn(move || cache.open("a").map(|f| f.len()))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fills the only queue slot
        let second = {
            let cache = cache.clone();
            thread::spawn(move || cache.open("b").map(|f| f.len()))
        };
        while cache.shards[0].len() < 1 {
            thread::sleep(Duration::from_millis(1));
        }

        // With a timeout the enqueue gives up and the queue is untouched
        let impatient = Cache {
            shards: cache.shards.clone(),
            timeout: Some(Duration::from_millis(20)),
        };
        assert!(matches!(impatient.open("c"), Err(CacheError::Timeout)));
        assert_eq!(cache.shards[0].len(), 1);

        // Without one the caller waits for room
        let third = {
            let cache = cache.clone();
            thread::spawn(move || cache.open("d").map(|f| f.len()))
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!third.is_finished());

        drop(gate_tx);
        for caller in [first, second, third] {
            assert_eq!(caller.join().unwrap().unwrap(), 1);
        }
        assert!(cache.entry_info("c").unwrap().is_none());

        stop(cache, workers);
    }

    #[test]
    fn test_shutdown_rejects_new_requests() {
        let (_dir, cache, workers) = start(1000, 2, Arc::new(MemoryOrigin::new()));
        let handle = cache.clone();
        stop(cache, workers);

        assert!(matches!(handle.open("late"), Err(CacheError::Shutdown)));
        assert!(matches!(handle.stats(), Err(CacheError::Shutdown)));
    }

    #[test]
    fn test_spawn_requires_a_store() {
        assert!(Cache::spawn(Vec::new(), 4, None).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_async() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.insert("async.bin", vec![3u8; 16]);
        let (_dir, cache, workers) = start(1000, 1, origin);

        let file = cache.open_async("async.bin").await.unwrap();
        assert_eq!(file.len(), 16);
        drop(file);

        let err = cache.open_async("nope").await.unwrap_err();
        assert!(err.is_not_found());

        stop(cache, workers);
    }
}
