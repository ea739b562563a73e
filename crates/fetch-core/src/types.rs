//! Value types shared between the cache store, its facade and the HTTP layer

use std::ops::AddAssign;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Eviction priority (fixed point, lower is evicted sooner)
pub type Priority = u64;

/// Result of `stat` on a leased file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Cache key
    pub name: String,
    /// Size in bytes, as declared by the origin
    pub size: u64,
    /// Modification time of the local copy
    pub modified: SystemTime,
}

/// Eviction metadata of one resident entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
    pub frequency: u64,
    pub priority: Priority,
}

/// Snapshot of store accounting and counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Configured capacity in bytes
    pub capacity: u64,
    /// Sum of resident entry sizes
    pub used: u64,
    /// Number of resident entries
    pub entries: usize,
    /// Logical clock (highest across shards when aggregated)
    pub clock: Priority,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Eviction candidates skipped because a reader held them
    pub busy_skips: u64,
    /// Eviction candidates whose file could not be removed
    pub eviction_failures: u64,
    pub origin_failures: u64,
}

impl CacheStats {
    /// Usage percentage
    pub fn usage_percent(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        (self.used as f64 / self.capacity as f64 * 100.0) as u32
    }
}

impl AddAssign<&CacheStats> for CacheStats {
    fn add_assign(&mut self, other: &CacheStats) {
        self.capacity += other.capacity;
        self.used += other.used;
        self.entries += other.entries;
        self.clock = self.clock.max(other.clock);
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.busy_skips += other.busy_skips;
        self.eviction_failures += other.eviction_failures;
        self.origin_failures += other.origin_failures;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_aggregate() {
        let mut total = CacheStats::default();
        total += &CacheStats {
            capacity: 100,
            used: 40,
            entries: 2,
            clock: 7,
            hits: 3,
            ..Default::default()
        };
        total += &CacheStats {
            capacity: 100,
            used: 10,
            entries: 1,
            clock: 5,
            misses: 4,
            ..Default::default()
        };

        assert_eq!(total.capacity, 200);
        assert_eq!(total.used, 50);
        assert_eq!(total.entries, 3);
        assert_eq!(total.clock, 7);
        assert_eq!(total.hits, 3);
        assert_eq!(total.misses, 4);
        assert_eq!(total.usage_percent(), 25);
    }

    #[test]
    fn test_usage_percent_empty() {
        assert_eq!(CacheStats::default().usage_percent(), 0);
    }
}
