//! The VIO backend object the sync engine drives.
//!
//! One `WebdavVio` owns the HTTP session, the three caches and the
//! clock-skew tracker; every VIO operation is a method on it. The
//! operation surface mirrors a filesystem: stat, directory iteration,
//! whole-file transfers, and namespace mutations, all multiplexed onto
//! a single serial WebDAV session.

pub mod namespace;
pub mod propfind;
pub mod transfer;

use std::sync::Arc;

use tracing::debug;

use crate::cache::{IdCache, StatCache};
use crate::session::DavSession;
use crate::skew::ClockSkew;
use crate::types::error::VioError;
use crate::types::{
    AuthCallback, FileStat, ProgressCallback, ProgressEvent, VioCapabilities, VioProperty,
};
use crate::uri;

use propfind::{Depth, ListingContext};

pub struct WebdavVio {
    pub(crate) session: DavSession,
    /// Most recent PROPFIND result, keyed by its cleaned target.
    pub(crate) propfind_cache: Option<Arc<ListingContext>>,
    pub(crate) stat_cache: StatCache,
    pub(crate) id_cache: IdCache,
    pub(crate) skew: ClockSkew,
    /// Parent directory of the last upload, to skip repeated parent
    /// stats within a directory burst.
    pub(crate) last_dir: Option<String>,
    pub(crate) progress: Option<ProgressCallback>,
}

impl WebdavVio {
    /// Build a backend. The auth callback is the engine's only channel
    /// for interactive prompts (credentials, certificate trust).
    pub fn new(auth: Option<AuthCallback>) -> Self {
        WebdavVio {
            session: DavSession::new(auth),
            propfind_cache: None,
            stat_cache: StatCache::default(),
            id_cache: IdCache::default(),
            skew: ClockSkew::default(),
            last_dir: None,
            progress: None,
        }
    }

    /// Establish the session if necessary. Safe to call per operation.
    pub fn connect(&mut self, url: &str) -> Result<(), VioError> {
        self.session.connect(url)
    }

    /// Stat a remote entry.
    ///
    /// Served from the stat cache when the engine stats what `readdir`
    /// just returned; otherwise one PROPFIND depth 1 and the entry
    /// matching the request path is translated.
    pub async fn stat(&mut self, uri_str: &str) -> Result<FileStat, VioError> {
        let name = uri::basename(uri_str);
        if let Some(cached) = self.stat_cache.lookup(&name) {
            debug!(name = %name, "stat served from cache");
            return Ok(cached);
        }

        self.session.connect(uri_str)?;
        let ctx = self.fetch_resource_list(uri_str, Depth::One).await?;
        let target_decoded = uri::unescape(&ctx.target);
        match ctx
            .list
            .iter()
            .find(|r| uri::paths_equal(&r.uri, &target_decoded))
        {
            Some(res) => Ok(propfind::resource_to_stat(res, &self.skew)),
            None => {
                let err = VioError::NoSuchEntry(format!("no such entry: {}", uri_str));
                Err(self.session.fail(err))
            }
        }
    }

    /// The file's content fingerprint (its ETag).
    ///
    /// A HEAD request would be cheaper, but ownCloud's HEAD handling
    /// is unreliable, so misses fall back to a full stat.
    pub async fn get_file_id(&mut self, path: &str) -> Result<Option<String>, VioError> {
        if let Some(etag) = self
            .id_cache
            .lookup(path)
            .or_else(|| self.id_cache.lookup(&uri::clean(path)))
        {
            return Ok(Some(etag));
        }
        let stat = self.stat(path).await?;
        Ok(stat.etag)
    }

    pub fn get_capabilities(&self) -> VioCapabilities {
        VioCapabilities::default()
    }

    /// The engine's configuration surface.
    pub fn set_property(&mut self, prop: VioProperty) {
        match prop {
            VioProperty::SessionKey(key) => self.session.set_session_key(key),
            VioProperty::ProxyType(kind) => self.session.proxy.kind = kind,
            VioProperty::ProxyHost(host) => self.session.proxy.host = Some(host),
            VioProperty::ProxyPort(port) => self.session.proxy.port = port,
            VioProperty::ProxyUser(user) => self.session.proxy.user = Some(user),
            VioProperty::ProxyPwd(pwd) => self.session.proxy.pwd = Some(pwd),
            VioProperty::ReadTimeout(seconds) => self.session.set_read_timeout(seconds),
            VioProperty::ProgressCallback(cb) => self.progress = Some(cb),
            VioProperty::SkewWarnThreshold(seconds) => self.skew.set_warn_threshold(seconds),
        }
    }

    /// Human-readable text of the most recent failure. Read it before
    /// the next operation overwrites it.
    pub fn get_error_string(&self) -> &str {
        self.session.error_string()
    }

    /// Tear the backend down: connection, credentials, cookie, caches
    /// and memos. Safe to call in any state.
    pub fn shutdown(&mut self) {
        self.session.shutdown();
        self.clear_caches();
        self.last_dir = None;
        self.progress = None;
    }

    /// Invalidate everything a mutation could have made stale.
    pub(crate) fn clear_caches(&mut self) {
        self.propfind_cache = None;
        self.stat_cache.clear();
        self.id_cache.clear();
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(cb) = &self.progress {
            cb(event);
        }
    }
}

#[cfg(test)]
impl WebdavVio {
    pub(crate) fn seed_caches_for_test(&mut self) {
        use crate::types::{stat_mode, FileType};

        self.propfind_cache = Some(Arc::new(ListingContext {
            target: "/files/".to_string(),
            list: Vec::new(),
        }));
        self.stat_cache.store(FileStat {
            name: "a.bin".to_string(),
            kind: FileType::Regular,
            size: Some(1024),
            mtime: 1_700_000_000,
            mode: stat_mode(FileType::Regular),
            etag: Some("etag".to_string()),
        });
        self.id_cache.store("/files/a.bin", "etag");
    }

    pub(crate) fn caches_empty_for_test(&self) -> bool {
        self.propfind_cache.is_none()
            && self.stat_cache.lookup("a.bin").is_none()
            && self.id_cache.lookup("/files/a.bin").is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    #[test]
    fn test_capabilities_surface() {
        let vio = WebdavVio::new(None);
        let caps = vio.get_capabilities();
        assert!(caps.atomar_copy);
        assert!(caps.propagate_on_fd);
        assert!(!caps.do_post_copy_stat);
    }

    #[test]
    fn test_clear_caches_empties_every_slot() {
        init_tracing();
        let mut vio = WebdavVio::new(None);
        vio.seed_caches_for_test();
        assert!(!vio.caches_empty_for_test());
        vio.clear_caches();
        assert!(vio.caches_empty_for_test());
    }

    #[test]
    fn test_cached_listing_is_shared_not_copied() {
        let mut vio = WebdavVio::new(None);
        vio.seed_caches_for_test();
        let ctx = vio.propfind_cache.as_ref().unwrap();
        // One reference in the cache slot; a reader would make it two.
        assert_eq!(Arc::strong_count(ctx), 1);
        let reader = Arc::clone(ctx);
        assert_eq!(Arc::strong_count(&reader), 2);
    }

    #[test]
    fn test_set_property_routes_to_session() {
        let mut vio = WebdavVio::new(None);
        vio.set_property(VioProperty::ProxyHost("proxy.local".to_string()));
        vio.set_property(VioProperty::ProxyPort(3128));
        assert_eq!(vio.session.proxy.host.as_deref(), Some("proxy.local"));
        assert_eq!(vio.session.proxy.port, 3128);

        vio.set_property(VioProperty::SkewWarnThreshold(10));
        vio.set_property(VioProperty::SessionKey("OCSID=z".to_string()));
    }

    #[test]
    fn test_shutdown_resets_everything() {
        let mut vio = WebdavVio::new(None);
        vio.seed_caches_for_test();
        vio.last_dir = Some("owncloud://h/files".to_string());
        vio.shutdown();
        assert!(vio.caches_empty_for_test());
        assert!(vio.last_dir.is_none());
        assert!(vio.get_error_string().is_empty());
    }

    #[test]
    fn test_progress_events_reach_the_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_cb = Arc::clone(&seen);
        let mut vio = WebdavVio::new(None);
        vio.set_property(VioProperty::ProgressCallback(Arc::new(move |_event| {
            seen_in_cb.fetch_add(1, Ordering::Relaxed);
        })));

        vio.emit(ProgressEvent::StartDownload {
            uri: "/x".to_string(),
            total: Some(10),
        });
        vio.emit(ProgressEvent::FinishedDownload {
            uri: "/x".to_string(),
        });
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
