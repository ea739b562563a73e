use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use fetch_core::OriginError;

use super::{Origin, OriginObject};

/// Origin serving byte buffers held in memory
///
/// Counts every `get`, which makes it useful for checking that resident
/// entries are not fetched twice.
#[derive(Debug, Default)]
pub struct MemoryOrigin {
    objects: RwLock<HashMap<String, Bytes>>,
    gets: AtomicU64,
}

impl MemoryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(name.into(), data.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.objects.write().remove(name).is_some()
    }

    /// Number of `get` calls so far, including misses
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }
}

impl Origin for MemoryOrigin {
    fn get(&self, name: &str) -> Result<OriginObject, OriginError> {
        self.gets.fetch_add(1, Ordering::Relaxed);

        let data = self
            .objects
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OriginError::NotFound(name.to_string()))?;

        Ok(OriginObject::new(data.len() as u64, Cursor::new(data)))
    }

    fn describe(&self) -> String {
        format!("memory ({} objects)", self.objects.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_memory_origin_get() {
        let origin = MemoryOrigin::new();
        origin.insert("a", vec![1u8, 2, 3]);

        let mut object = origin.get("a").unwrap();
        assert_eq!(object.size, 3);
        let mut data = Vec::new();
        object.body.read_to_end(&mut data).unwrap();
        assert_eq!(data, vec![1, 2, 3]);

        assert!(origin.get("b").unwrap_err().is_not_found());
        assert_eq!(origin.get_count(), 2);
    }

    #[test]
    fn test_memory_origin_remove() {
        let origin = MemoryOrigin::new();
        origin.insert("a", "x");
        assert!(origin.remove("a"));
        assert!(!origin.remove("a"));
        assert!(origin.get("a").is_err());
    }
}
