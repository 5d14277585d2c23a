//! Byte-budgeted, content-addressed file cache.
//!
//! Generalizes the type-only LRU cache the static-file path used to keep
//! (path -> file/dir/missing) into one that also holds file bytes and MIME
//! type, bounded by total resident size rather than entry count.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A resident cache entry. Cheap to clone: the payload is reference counted.
#[derive(Clone)]
pub struct CacheEntry {
    pub bytes: std::sync::Arc<[u8]>,
    pub mime: std::sync::Arc<str>,
    pub size: u64,
}

/// Outcome of resolving a path against the cache and, on miss, the disk.
pub enum Lookup {
    /// Served from memory.
    Cached(CacheEntry),
    /// The file exists but is larger than the cache budget; the caller
    /// should stream it straight from disk instead of buffering it.
    Uncached { path: std::path::PathBuf, size: u64, mime: String },
    NotFound,
}

pub struct FileCache {
    entries: RwLock<HashMap<Box<str>, CacheEntry>>,
    /// LRU order, least-recently-used at the front.
    order: RwLock<Vec<Box<str>>>,
    budget: u64,
    resident: AtomicU64,
}

impl FileCache {
    pub fn with_budget(budget: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            budget,
            resident: AtomicU64::new(0),
        }
    }

    /// Cache-only read; does not touch disk. Marks the entry as recently
    /// used on hit.
    pub fn get(&self, path: &str) -> Option<CacheEntry> {
        let hit = self.entries.read().unwrap().get(path).cloned();
        if hit.is_some() {
            self.touch(path);
        }
        hit
    }

    /// Resolve `path`: cache hit, fresh read-and-insert, oversize passthrough,
    /// or not found.
    pub fn lookup(&self, path: &Path) -> io::Result<Lookup> {
        let key = path.to_string_lossy().into_owned();
        if let Some(entry) = self.get(&key) {
            return Ok(Lookup::Cached(entry));
        }

        let meta = match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(Lookup::NotFound),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Lookup::NotFound),
            Err(e) => return Err(e),
        };

        let size = meta.len();
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        if size > self.budget {
            return Ok(Lookup::Uncached { path: path.to_path_buf(), size, mime });
        }

        let bytes = std::fs::read(path)?;
        let entry = CacheEntry {
            bytes: std::sync::Arc::from(bytes.into_boxed_slice()),
            mime: std::sync::Arc::from(mime.as_str()),
            size,
        };
        self.insert(key.into_boxed_str(), entry.clone());
        Ok(Lookup::Cached(entry))
    }

    fn insert(&self, key: Box<str>, entry: CacheEntry) {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&key) {
            return;
        }
        let mut order = self.order.write().unwrap();
        while self.resident.load(Ordering::Relaxed) + entry.size > self.budget {
            let Some(oldest) = order.first().cloned() else {
                break;
            };
            order.remove(0);
            if let Some(old) = entries.remove(&oldest) {
                self.resident.fetch_sub(old.size, Ordering::Relaxed);
            }
        }
        self.resident.fetch_add(entry.size, Ordering::Relaxed);
        order.push(key.clone());
        entries.insert(key, entry);
    }

    fn touch(&self, path: &str) {
        let mut order = self.order.write().unwrap();
        if let Some(pos) = order.iter().position(|p| &**p == path) {
            let entry = order.remove(pos);
            order.push(entry);
        }
    }

    #[cfg(test)]
    fn resident_bytes(&self) -> u64 {
        self.resident.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::with_budget(1024);
        let lookup = cache.lookup(&dir.path().join("nope.html")).unwrap();
        assert!(matches!(lookup, Lookup::NotFound));
    }

    #[test]
    fn directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::with_budget(1024);
        let lookup = cache.lookup(dir.path()).unwrap();
        assert!(matches!(lookup, Lookup::NotFound));
    }

    #[test]
    fn small_file_is_cached_on_first_read() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "index.html", b"hello");
        let cache = FileCache::with_budget(1024);

        match cache.lookup(&path).unwrap() {
            Lookup::Cached(entry) => assert_eq!(&*entry.bytes, b"hello"),
            _ => panic!("expected cache hit"),
        }
        assert!(cache.get(&path.to_string_lossy()).is_some());
    }

    #[test]
    fn oversize_file_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "big.bin", &vec![0u8; 64]);
        let cache = FileCache::with_budget(8);

        match cache.lookup(&path).unwrap() {
            Lookup::Uncached { size, .. } => assert_eq!(size, 64),
            _ => panic!("expected uncached"),
        }
        assert!(cache.get(&path.to_string_lossy()).is_none());
        assert_eq!(cache.resident_bytes(), 0);
    }

    #[test]
    fn lru_eviction_drops_oldest_entry() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.html", b"aaaa");
        let b = write_file(&dir, "b.html", b"bbbb");
        let c = write_file(&dir, "c.html", b"cccc");
        let cache = FileCache::with_budget(8);

        cache.lookup(&a).unwrap();
        cache.lookup(&b).unwrap();
        // budget is 8 bytes; inserting c (4 bytes) must evict a, the
        // least-recently-used entry, to stay within budget.
        cache.lookup(&c).unwrap();

        assert!(cache.get(&a.to_string_lossy()).is_none());
        assert!(cache.get(&b.to_string_lossy()).is_some());
        assert!(cache.get(&c.to_string_lossy()).is_some());
        assert!(cache.resident_bytes() <= 8);
    }

    #[test]
    fn touch_on_hit_protects_from_eviction() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.html", b"aaaa");
        let b = write_file(&dir, "b.html", b"bbbb");
        let c = write_file(&dir, "c.html", b"cccc");
        let cache = FileCache::with_budget(8);

        cache.lookup(&a).unwrap();
        cache.lookup(&b).unwrap();
        // re-touch a so b becomes the least-recently-used entry
        cache.lookup(&a).unwrap();
        cache.lookup(&c).unwrap();

        assert!(cache.get(&a.to_string_lossy()).is_some());
        assert!(cache.get(&b.to_string_lossy()).is_none());
    }
}
