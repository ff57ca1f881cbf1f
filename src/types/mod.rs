pub mod error;

pub use error::VioError;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Result alias for VIO operations.
pub type Result<T> = std::result::Result<T, VioError>;

/// What a remote entry is, as far as the engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Regular,
    Directory,
}

/// A file stat as handed to the sync engine.
///
/// The server has no POSIX permission model, so `mode` carries
/// synthesized bits; `mtime` is already corrected for server clock
/// skew. `etag` is the server's content fingerprint with the outer
/// quotes stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    pub kind: FileType,
    /// Byte size; collections carry none.
    pub size: Option<i64>,
    /// Modification time, UTC epoch seconds, engine view.
    pub mtime: i64,
    pub mode: u32,
    pub etag: Option<String>,
}

/// Synthesized permission bits. Directories get `drwxr-xr-x`, regular
/// files `-rw-r--r--`; the server cannot express anything finer.
pub fn stat_mode(kind: FileType) -> u32 {
    match kind {
        FileType::Directory => 0o040755,
        FileType::Regular => 0o100644,
    }
}

/// Open flags as passed down by the engine. Any write-ish flag turns
/// the transfer into a PUT.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub write_only: bool,
    pub read_write: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    /// Read-only open, the default.
    pub const RDONLY: OpenFlags = OpenFlags {
        write_only: false,
        read_write: false,
        create: false,
        truncate: false,
    };

    /// The flag set `creat` uses: O_CREAT|O_WRONLY|O_TRUNC.
    pub const CREATE: OpenFlags = OpenFlags {
        write_only: true,
        read_write: false,
        create: true,
        truncate: true,
    };

    pub fn wants_put(&self) -> bool {
        self.write_only || self.read_write || self.create
    }
}

/// What this backend can and cannot do, queried once by the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VioCapabilities {
    pub atomar_copy: bool,
    pub do_post_copy_stat: bool,
    pub time_sync_required: bool,
    pub unix_extensions: i32,
    pub propagate_on_fd: bool,
}

impl Default for VioCapabilities {
    fn default() -> Self {
        VioCapabilities {
            atomar_copy: true,
            do_post_copy_stat: false,
            time_sync_required: false,
            unix_extensions: 0,
            propagate_on_fd: true,
        }
    }
}

/// Proxy flavors the engine can configure. Only the HTTP family is
/// actually routed; FTP caching and SOCKS5 are logged as unsupported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyType {
    #[default]
    NoProxy,
    DefaultProxy,
    HttpProxy,
    HttpCachingProxy,
    FtpCachingProxy,
    Socks5Proxy,
}

/// Progress notifications emitted to the engine during transfers.
#[derive(Debug, Clone, Serialize)]
pub enum ProgressEvent {
    StartUpload { uri: String, total: u64 },
    FinishedUpload { uri: String },
    StartDownload { uri: String, total: Option<u64> },
    FinishedDownload { uri: String },
    Progress { uri: String, sent: u64, total: u64 },
    Error { uri: String, code: u16, reason: String },
}

/// Callback the engine supplies for interactive prompts (credentials,
/// certificate trust). `echo` is false for secrets.
pub type AuthCallback = Arc<dyn Fn(&str, bool) -> String + Send + Sync>;

/// Callback the engine supplies to observe transfer progress. Must not
/// re-enter VIO operations.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Configurable properties, the `set_property` surface.
pub enum VioProperty {
    SessionKey(String),
    ProxyType(ProxyType),
    ProxyHost(String),
    ProxyPort(u16),
    ProxyUser(String),
    ProxyPwd(String),
    ReadTimeout(u64),
    ProgressCallback(ProgressCallback),
    /// Warn when the observed clock skew jumps by more than this many
    /// seconds between samples.
    SkewWarnThreshold(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_mode_synthesis() {
        assert_eq!(stat_mode(FileType::Directory), 0o040755);
        assert_eq!(stat_mode(FileType::Regular), 0o100644);
    }

    #[test]
    fn test_open_flags_put_intent() {
        assert!(!OpenFlags::RDONLY.wants_put());
        assert!(OpenFlags::CREATE.wants_put());
        let write_only = OpenFlags {
            write_only: true,
            ..OpenFlags::RDONLY
        };
        assert!(write_only.wants_put());
        let rdwr = OpenFlags {
            read_write: true,
            ..OpenFlags::RDONLY
        };
        assert!(rdwr.wants_put());
    }

    #[test]
    fn test_default_capabilities() {
        let caps = VioCapabilities::default();
        assert!(caps.atomar_copy);
        assert!(!caps.do_post_copy_stat);
        assert!(!caps.time_sync_required);
        assert_eq!(caps.unix_extensions, 0);
        assert!(caps.propagate_on_fd);
    }
}
