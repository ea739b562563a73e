//! Cache Store - the single-writer cache manager
//!
//! The store owns the name index, the entry arena, the eviction heap, the
//! logical clock and capacity accounting. All of it is plain owned state:
//! requests arrive one at a time over a bounded channel and are processed
//! to completion by [`CacheStore::run`], which is the only place any of it
//! changes. Concurrency with readers happens per entry, through the entry's
//! reader/writer lock.
//!
//! # Open
//!
//! ```text
//! hit:   frequency += 1, priority = clock + frequency/size, heap fix, lease
//! miss:  origin.get ─► evict until used + size <= capacity
//!                  ─► stage .incoming/<name>, copy, rename to <name>
//!                  ─► register (frequency 1, priority clock + 1/size), lease
//! ```
//!
//! Eviction only destroys an entry after a non-blocking exclusive lock on
//! its file succeeds. Busy candidates are set aside and pushed back once the
//! scan ends.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

use fetch_core::{validate_name, CacheError, CacheStats, EntryInfo, Priority};

use crate::entry::{CachedFile, Entry};
use crate::origin::{Origin, OriginObject};
use crate::priority_queue::{EntryId, HeapSlots, PriorityQueue};

/// Staging directory for in-flight downloads, inside the cache root
pub const STAGING_DIR: &str = ".incoming";

/// Request processed by a store's worker
#[derive(Debug)]
pub enum StoreRequest {
    /// Open a file by cache key
    Open {
        name: String,
        reply: Sender<Result<CachedFile, CacheError>>,
    },

    /// Snapshot accounting and counters
    Stats { reply: Sender<CacheStats> },

    /// Eviction metadata of one entry
    Inspect {
        name: String,
        reply: Sender<Option<EntryInfo>>,
    },

    /// Stop the worker
    Shutdown,
}

/// Entry storage addressed by [`EntryId`]
#[derive(Debug, Default)]
struct EntryArena {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
}

impl EntryArena {
    fn insert(&mut self, entry: Entry) -> EntryId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(entry);
                EntryId::new(index)
            }
            None => {
                self.slots.push(Some(entry));
                EntryId::new(self.slots.len() - 1)
            }
        }
    }

    fn remove(&mut self, id: EntryId) -> Option<Entry> {
        let entry = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.index());
        Some(entry)
    }

    fn get(&self, id: EntryId) -> Option<&Entry> {
        self.slots.get(id.index())?.as_ref()
    }

    fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    #[cfg(test)]
    fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|e| (EntryId::new(index), e)))
    }
}

impl HeapSlots for EntryArena {
    fn priority(&self, id: EntryId) -> Priority {
        self.get(id).map_or(Priority::MAX, |e| e.priority)
    }

    fn heap_index(&self, id: EntryId) -> Option<usize> {
        self.get(id).and_then(|e| e.heap_index)
    }

    fn set_heap_index(&mut self, id: EntryId, index: Option<usize>) {
        if let Some(entry) = self.get_mut(id) {
            entry.heap_index = index;
        }
    }
}

/// Outcome of one eviction attempt
enum Eviction {
    Evicted,
    Busy,
    Failed,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    busy_skips: u64,
    eviction_failures: u64,
    origin_failures: u64,
}

/// The cache manager
pub struct CacheStore {
    root: PathBuf,
    staging: PathBuf,
    origin: Arc<dyn Origin>,
    capacity: u64,
    used: u64,
    clock: Priority,
    index: HashMap<String, EntryId>,
    entries: EntryArena,
    queue: PriorityQueue,
    counters: Counters,
}

impl CacheStore {
    /// Create a store rooted at `root`
    ///
    /// With `clear` set, regular files left in `root` by a previous run and
    /// everything in the staging directory are removed.
    pub fn new(
        root: impl Into<PathBuf>,
        capacity: u64,
        origin: Arc<dyn Origin>,
        clear: bool,
    ) -> Result<Self, CacheError> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        let root_name = root.display().to_string();

        fs::create_dir_all(&staging).map_err(|e| CacheError::storage(&root_name, e))?;
        if clear {
            purge_files(&root).map_err(|e| CacheError::storage(&root_name, e))?;
            purge_files(&staging).map_err(|e| CacheError::storage(&root_name, e))?;
        }

        debug!("Cache store at {:?}, capacity {} bytes", root, capacity);

        Ok(Self {
            root,
            staging,
            origin,
            capacity,
            used: 0,
            clock: 0,
            index: HashMap::new(),
            entries: EntryArena::default(),
            queue: PriorityQueue::new(),
            counters: Counters::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn clock(&self) -> Priority {
        self.clock
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Process requests until shutdown or until every sender is gone
    pub fn run(mut self, requests: Receiver<StoreRequest>) {
        info!(
            "Cache store started: {:?}, capacity {} bytes",
            self.root, self.capacity
        );

        for request in requests.iter() {
            match request {
                StoreRequest::Open { name, reply } => {
                    let result = self.open(&name);
                    // A caller that gave up drops its receiver, the lease
                    // inside the failed send is released here.
                    if reply.send(result).is_err() {
                        debug!("caller for {} went away before the reply", name);
                    }
                }
                StoreRequest::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                StoreRequest::Inspect { name, reply } => {
                    let _ = reply.send(self.entry_info(&name));
                }
                StoreRequest::Shutdown => {
                    debug!("cache store received shutdown");
                    break;
                }
            }
        }

        info!(
            "Cache store stopped: {} entries, {} bytes resident",
            self.len(),
            self.used
        );
    }

    /// Open `name`, fetching it from the origin on a miss
    pub fn open(&mut self, name: &str) -> Result<CachedFile, CacheError> {
        validate_name(name)?;

        if let Some(id) = self.index.get(name).copied() {
            if let Some(file) = self.hit(id) {
                self.counters.hits += 1;
                return Ok(file);
            }
            warn!("{} is resident but could not be leased, refetching", name);
            self.detach(id);
        }

        self.counters.misses += 1;
        self.miss(name)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            used: self.used,
            entries: self.index.len(),
            clock: self.clock,
            hits: self.counters.hits,
            misses: self.counters.misses,
            evictions: self.counters.evictions,
            busy_skips: self.counters.busy_skips,
            eviction_failures: self.counters.eviction_failures,
            origin_failures: self.counters.origin_failures,
        }
    }

    pub fn entry_info(&self, name: &str) -> Option<EntryInfo> {
        let id = self.index.get(name)?;
        self.entries.get(*id).map(Entry::info)
    }

    fn hit(&mut self, id: EntryId) -> Option<CachedFile> {
        let clock = self.clock;
        let entry = self.entries.get_mut(id)?;
        entry.touch(clock);
        trace!(
            "hit {}: frequency {}, priority {}",
            entry.name,
            entry.frequency,
            entry.priority
        );
        self.queue.fix(id, &mut self.entries);
        self.entries.get(id)?.lease()
    }

    fn miss(&mut self, name: &str) -> Result<CachedFile, CacheError> {
        let object = self.origin.get(name).map_err(|e| {
            self.counters.origin_failures += 1;
            debug!("origin get {} failed: {}", name, e);
            CacheError::from(e)
        })?;
        let size = object.size;

        if size > self.capacity {
            warn!(
                "{} is {} bytes, larger than the cache capacity of {}",
                name, size, self.capacity
            );
            return Err(CacheError::CapacityUnsatisfiable {
                name: name.to_string(),
                size,
                capacity: self.capacity,
            });
        }

        self.make_room(name, size)?;

        let path = self.root.join(name);
        let (file, modified) = self.materialize(name, &path, object)?;

        let entry = Entry::new(name.to_string(), path, size, self.clock, file, modified);
        let file = entry
            .lease()
            .ok_or_else(|| CacheError::storage(name, io::Error::other("new entry is locked")))?;

        let id = self.entries.insert(entry);
        self.queue.push(id, &mut self.entries);
        self.index.insert(name.to_string(), id);
        self.used += size;

        debug!(
            "cached {} ({} bytes), {} / {} bytes used",
            name, size, self.used, self.capacity
        );
        Ok(file)
    }

    /// Evict until `size` more bytes fit
    fn make_room(&mut self, name: &str, size: u64) -> Result<(), CacheError> {
        let mut deferred = Vec::new();

        let result = loop {
            if self.used.saturating_add(size) <= self.capacity {
                break Ok(());
            }
            let Some(id) = self.queue.pop_min(&mut self.entries) else {
                warn!(
                    "cannot make room for {} ({} bytes): {} candidates busy",
                    name,
                    size,
                    deferred.len()
                );
                break Err(CacheError::CapacityUnsatisfiable {
                    name: name.to_string(),
                    size,
                    capacity: self.capacity,
                });
            };
            match self.evict(id) {
                Eviction::Evicted => {}
                Eviction::Busy => {
                    self.counters.busy_skips += 1;
                    deferred.push(id);
                }
                Eviction::Failed => {
                    self.counters.eviction_failures += 1;
                    deferred.push(id);
                }
            }
        };

        for id in deferred {
            self.queue.push(id, &mut self.entries);
        }

        result
    }

    /// Try to destroy a popped entry
    fn evict(&mut self, id: EntryId) -> Eviction {
        let Some(entry) = self.entries.get(id) else {
            return Eviction::Failed;
        };

        let Some(exclusive) = entry.try_exclusive() else {
            trace!("{} is being read, skipping", entry.name);
            return Eviction::Busy;
        };

        if let Err(e) = fs::remove_file(&entry.path) {
            error!("Failed to remove cache file {:?}: {}", entry.path, e);
            return Eviction::Failed;
        }
        drop(exclusive);

        let Some(entry) = self.entries.remove(id) else {
            return Eviction::Failed;
        };
        self.index.remove(&entry.name);
        self.used -= entry.size;
        self.clock = self.clock.max(entry.priority);
        self.counters.evictions += 1;

        debug!(
            "evicted {} ({} bytes, frequency {}), clock now {}",
            entry.name, entry.size, entry.frequency, self.clock
        );
        Eviction::Evicted
    }

    /// Forget an entry without touching its file
    fn detach(&mut self, id: EntryId) {
        self.queue.remove(id, &mut self.entries);
        if let Some(entry) = self.entries.remove(id) {
            self.index.remove(&entry.name);
            self.used -= entry.size;
        }
    }

    /// Copy the origin body into place, via the staging directory
    fn materialize(
        &self,
        name: &str,
        path: &Path,
        mut object: OriginObject,
    ) -> Result<(File, SystemTime), CacheError> {
        let staged = self.staging.join(name);

        let result = stage(name, &staged, path, &mut object);

        if let Err(e) = &result {
            error!("Failed to materialize {}: {}", name, e);
            if let Err(e) = fs::remove_file(&staged) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove staged file {:?}: {}", staged, e);
                }
            }
        }

        result
    }

    /// Check every bookkeeping invariant
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut total = 0;
        let mut live = 0;
        for (id, entry) in self.entries.iter() {
            live += 1;
            total += entry.size;
            assert_eq!(self.index.get(&entry.name), Some(&id), "{} not indexed", entry.name);
            let position = entry.heap_index.expect("resident entry missing from heap");
            assert_eq!(self.queue.iter().nth(position), Some(id));
        }
        assert_eq!(live, self.index.len());
        assert_eq!(self.queue.len(), self.index.len());
        assert_eq!(total, self.used, "used does not match resident sizes");
        assert!(self.used <= self.capacity, "used exceeds capacity");
        for id in self.queue.iter() {
            assert!(self.entries.get(id).is_some(), "heap holds a dead id");
        }
    }
}

/// Write `object` to `staged`, check its length and move it to `path`
fn stage(
    name: &str,
    staged: &Path,
    path: &Path,
    object: &mut OriginObject,
) -> Result<(File, SystemTime), CacheError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(staged)
        .map_err(|e| CacheError::storage(name, e))?;

    // One byte past the declared size is enough to detect an overlong body
    let mut body = (&mut object.body).take(object.size.saturating_add(1));
    let copied = io::copy(&mut body, &mut file).map_err(|e| CacheError::storage(name, e))?;
    if copied != object.size {
        return Err(CacheError::SizeMismatch {
            name: name.to_string(),
            declared: object.size,
            actual: copied,
        });
    }

    fs::rename(staged, path).map_err(|e| CacheError::storage(name, e))?;

    let modified = file
        .metadata()
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now());
    Ok((file, modified))
}

/// Remove the regular files directly inside `dir`
fn purge_files(dir: &Path) -> io::Result<()> {
    let mut removed = 0;
    for item in fs::read_dir(dir)? {
        let item = item?;
        if item.file_type()?.is_file() {
            fs::remove_file(item.path())?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Removed {} stale files from {:?}", removed, dir);
    }
    Ok(())
}
