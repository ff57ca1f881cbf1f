//! Single-slot caches that absorb the engine's access patterns.
//!
//! The engine calls `readdir` and then immediately `stat`s the entry it
//! just saw, and asks for a file id right after stating the file. Each
//! cache holds exactly the last observation; any successful mutating
//! operation clears them so reads never see stale state.

use crate::types::FileStat;

/// Last file stat produced by `readdir`, keyed by basename.
#[derive(Debug, Default)]
pub struct StatCache {
    entry: Option<FileStat>,
}

impl StatCache {
    pub fn lookup(&self, name: &str) -> Option<FileStat> {
        self.entry.as_ref().filter(|fs| fs.name == name).cloned()
    }

    pub fn store(&mut self, stat: FileStat) {
        self.entry = Some(stat);
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.entry.as_ref().is_some_and(|fs| fs.name == name)
    }
}

/// Last ETag observed for a URI, from a bare `ETag:` response header on
/// a successful request.
#[derive(Debug, Default)]
pub struct IdCache {
    entry: Option<(String, String)>,
}

impl IdCache {
    pub fn lookup(&self, uri: &str) -> Option<String> {
        self.entry
            .as_ref()
            .filter(|(cached, _)| cached == uri)
            .map(|(_, etag)| etag.clone())
    }

    pub fn store(&mut self, uri: &str, etag: &str) {
        self.entry = Some((uri.to_string(), etag.to_string()));
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

/// Strip the outer quotes an ETag header carries on the wire.
pub fn strip_etag_quotes(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{stat_mode, FileType};

    fn stat(name: &str) -> FileStat {
        FileStat {
            name: name.to_string(),
            kind: FileType::Regular,
            size: Some(42),
            mtime: 1_700_000_000,
            mode: stat_mode(FileType::Regular),
            etag: Some("abc".to_string()),
        }
    }

    #[test]
    fn test_stat_cache_hit_and_miss() {
        let mut cache = StatCache::default();
        assert!(cache.lookup("a.txt").is_none());
        cache.store(stat("a.txt"));
        assert_eq!(cache.lookup("a.txt").unwrap().size, Some(42));
        assert!(cache.lookup("b.txt").is_none());
    }

    #[test]
    fn test_stat_cache_clear() {
        let mut cache = StatCache::default();
        cache.store(stat("a.txt"));
        cache.clear();
        assert!(cache.lookup("a.txt").is_none());
    }

    #[test]
    fn test_id_cache_matches_exact_uri() {
        let mut cache = IdCache::default();
        cache.store("/files/a.txt", "etag-1");
        assert_eq!(cache.lookup("/files/a.txt").as_deref(), Some("etag-1"));
        assert!(cache.lookup("/files/b.txt").is_none());
        cache.clear();
        assert!(cache.lookup("/files/a.txt").is_none());
    }

    #[test]
    fn test_strip_etag_quotes() {
        assert_eq!(strip_etag_quotes("\"5528cd1ad\""), "5528cd1ad");
        assert_eq!(strip_etag_quotes("plain"), "plain");
        assert_eq!(strip_etag_quotes(" \"x\" "), "x");
    }
}
