//! Whole-body transfers: PUT from a local file, GET into a local file.
//!
//! The engine does all bulk transfer through `sendfile`; `read`,
//! `write` and `lseek` exist only for interface compatibility.
//! Downloads advertise gzip and decode it on the fly, pushing each
//! decoded chunk straight into the target file.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flate2::write::GzDecoder;
use futures::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, ETAG};
use reqwest::{Body, Method, StatusCode};
use tracing::{debug, warn};

use crate::cache::strip_etag_quotes;
use crate::types::error::{map_http_status, VioError};
use crate::types::{OpenFlags, ProgressEvent};
use crate::uri;

use super::WebdavVio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    Put,
    Get,
}

/// An open transfer as handed back by `open`/`creat`.
#[derive(Debug)]
pub struct TransferHandle {
    pub(crate) method: TransferMethod,
    pub(crate) clean_uri: String,
}

impl TransferHandle {
    pub fn method(&self) -> TransferMethod {
        self.method
    }

    /// The escaped server path this transfer targets.
    pub fn uri(&self) -> &str {
        &self.clean_uri
    }
}

/// Where downloaded bytes go: straight to the file, or through a
/// streaming gzip decoder first.
enum DownloadSink<'a> {
    Plain(&'a mut File),
    Gzip(GzDecoder<&'a mut File>),
}

impl<'a> DownloadSink<'a> {
    fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            DownloadSink::Plain(f) => f.write_all(data),
            DownloadSink::Gzip(d) => d.write_all(data),
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            DownloadSink::Plain(f) => f.flush(),
            DownloadSink::Gzip(d) => d.finish()?.flush(),
        }
    }
}

impl WebdavVio {
    /// Open a transfer. Write-ish flags mean an upload; the parent
    /// collection must exist before any body is sent. Consecutive
    /// uploads into the same directory reuse the parent check.
    pub async fn open(
        &mut self,
        uri_str: &str,
        flags: OpenFlags,
    ) -> Result<TransferHandle, VioError> {
        let curi = uri::clean(uri_str);
        if curi.is_empty() {
            let err = VioError::InvalidArgument(format!("cannot clean path: {}", uri_str));
            return Err(self.session.fail(err));
        }
        self.session.connect(uri_str)?;

        let put = flags.wants_put();
        debug!(uri = %curi, put, "open transfer");

        if put {
            let parent = uri::dirname(uri_str);
            if self.last_dir.as_deref() != Some(parent.as_str()) {
                if self.stat(&parent).await.is_err() {
                    let err = VioError::NoSuchEntry(format!(
                        "parent directory of {} does not exist",
                        uri_str
                    ));
                    return Err(self.session.fail(err));
                }
                self.last_dir = Some(parent);
            }
        }

        Ok(TransferHandle {
            method: if put {
                TransferMethod::Put
            } else {
                TransferMethod::Get
            },
            clean_uri: curi,
        })
    }

    /// Create a remote file: open for writing and establish the empty
    /// resource with a zero-length PUT.
    pub async fn creat(&mut self, uri_str: &str) -> Result<TransferHandle, VioError> {
        let handle = self.open(uri_str, OpenFlags::CREATE).await?;

        let req = self
            .session
            .request(Method::PUT, &handle.clean_uri)?
            .header(CONTENT_LENGTH, 0u64)
            .body(Vec::new());
        let resp = self.session.dispatch(req).await?;
        let status = resp.status();
        if let Err(err) = map_http_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("PUT failed"),
        ) {
            return Err(self.session.fail(err));
        }

        Ok(handle)
    }

    /// Run the transfer: PUT the file's contents, or GET into it.
    pub async fn sendfile(
        &mut self,
        handle: &TransferHandle,
        file: &mut File,
    ) -> Result<u64, VioError> {
        match handle.method {
            TransferMethod::Put => self.send_put(handle, file).await,
            TransferMethod::Get => self.send_get(handle, file).await,
        }
    }

    async fn send_put(&mut self, handle: &TransferHandle, file: &mut File) -> Result<u64, VioError> {
        let meta = file
            .metadata()
            .map_err(|e| self.session.fail(VioError::BadFd(e.to_string())))?;
        let total = meta.len();
        file.seek(SeekFrom::Start(0))
            .map_err(|e| self.session.fail(VioError::BadFd(e.to_string())))?;
        let body_file = file
            .try_clone()
            .map_err(|e| self.session.fail(VioError::BadFd(e.to_string())))?;

        debug!(uri = %handle.clean_uri, total, "starting upload");
        self.emit(ProgressEvent::StartUpload {
            uri: handle.clean_uri.clone(),
            total,
        });

        let progress = self.progress.clone();
        let progress_uri = handle.clean_uri.clone();
        let sent = Arc::new(AtomicU64::new(0));
        let stream =
            tokio_util::io::ReaderStream::new(tokio::fs::File::from_std(body_file)).inspect(
                move |chunk| {
                    if let (Some(cb), Ok(c)) = (progress.as_ref(), chunk.as_ref()) {
                        let so_far =
                            sent.fetch_add(c.len() as u64, Ordering::Relaxed) + c.len() as u64;
                        cb(ProgressEvent::Progress {
                            uri: progress_uri.clone(),
                            sent: so_far,
                            total,
                        });
                    }
                },
            );

        let req = self
            .session
            .request(Method::PUT, &handle.clean_uri)?
            .header(CONTENT_LENGTH, total)
            .body(Body::wrap_stream(stream));
        let resp = self.session.dispatch(req).await?;
        let status = resp.status();

        if status.is_client_error() || status.is_server_error() {
            warn!(uri = %handle.clean_uri, status = status.as_u16(), "upload rejected");
            return Err(self.soft_error(&handle.clean_uri, status));
        }
        if let Err(err) = map_http_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("PUT failed"),
        ) {
            return Err(self.session.fail(err));
        }

        self.emit(ProgressEvent::FinishedUpload {
            uri: handle.clean_uri.clone(),
        });
        Ok(total)
    }

    async fn send_get(&mut self, handle: &TransferHandle, file: &mut File) -> Result<u64, VioError> {
        let req = self
            .session
            .request(Method::GET, &handle.clean_uri)?
            .header(ACCEPT_ENCODING, "gzip");
        let resp = self.session.dispatch(req).await?;
        let status = resp.status();

        if status.is_client_error() || status.is_server_error() {
            warn!(uri = %handle.clean_uri, status = status.as_u16(), "download rejected");
            return Err(self.soft_error(&handle.clean_uri, status));
        }
        if let Err(err) = map_http_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("GET failed"),
        ) {
            return Err(self.session.fail(err));
        }

        if let Some(etag) = resp.headers().get(ETAG).and_then(|v| v.to_str().ok()) {
            self.id_cache
                .store(&handle.clean_uri, &strip_etag_quotes(etag));
        }

        let gzipped = resp
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("gzip"));
        let total = resp.content_length();

        debug!(uri = %handle.clean_uri, gzipped, total, "starting download");
        self.emit(ProgressEvent::StartDownload {
            uri: handle.clean_uri.clone(),
            total,
        });

        let mut sink = if gzipped {
            DownloadSink::Gzip(GzDecoder::new(file))
        } else {
            DownloadSink::Plain(file)
        };
        let mut received: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.session.fail(VioError::Io(e.to_string())))?;
            received += chunk.len() as u64;
            sink.write_chunk(&chunk)
                .map_err(|e| self.session.fail(VioError::BadFd(e.to_string())))?;
            if let Some(total) = total {
                self.emit(ProgressEvent::Progress {
                    uri: handle.clean_uri.clone(),
                    sent: received,
                    total,
                });
            }
        }
        sink.finish()
            .map_err(|e| self.session.fail(VioError::BadFd(e.to_string())))?;

        self.emit(ProgressEvent::FinishedDownload {
            uri: handle.clean_uri.clone(),
        });
        Ok(received)
    }

    /// Finish a transfer. After an upload every cache is stale, so
    /// clear them all; reads have nothing to tear down.
    pub fn close(&mut self, handle: TransferHandle) -> Result<(), VioError> {
        if handle.method == TransferMethod::Put {
            self.clear_caches();
        }
        Ok(())
    }

    /// Per-file HTTP failure: recorded and reported, never fatal to
    /// the session.
    fn soft_error(&mut self, uri: &str, status: StatusCode) -> VioError {
        let code = status.as_u16();
        let reason = status.canonical_reason().unwrap_or("request failed");
        self.session.set_error_string(format!("{} {}", code, reason));
        self.emit(ProgressEvent::Error {
            uri: uri.to_string(),
            code,
            reason: reason.to_string(),
        });
        match map_http_status(code, reason) {
            Err(err) => err,
            Ok(()) => VioError::Io(format!("{} {}", code, reason)),
        }
    }

    /// Bulk transfer happens exclusively through `sendfile`; these
    /// exist so the operation table stays complete.
    pub fn read(&mut self, _handle: &TransferHandle, _buf: &mut [u8]) -> Result<usize, VioError> {
        Ok(0)
    }

    pub fn write(&mut self, _handle: &TransferHandle, _buf: &[u8]) -> Result<usize, VioError> {
        Ok(0)
    }

    pub fn lseek(&mut self, _handle: &TransferHandle, _offset: i64) -> Result<u64, VioError> {
        Err(VioError::InvalidArgument(
            "seek is not supported on WebDAV transfers".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Read;

    fn gzip_bytes(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_gzip_sink_decompresses_chunked_input() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let compressed = gzip_bytes(&payload);

        let mut file = tempfile::tempfile().unwrap();
        {
            let mut sink = DownloadSink::Gzip(GzDecoder::new(&mut file));
            // Feed in uneven chunks, the way a body stream arrives.
            for chunk in compressed.chunks(100) {
                sink.write_chunk(chunk).unwrap();
            }
            sink.finish().unwrap();
        }

        let mut out = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_plain_sink_passes_bytes_through() {
        let mut file = tempfile::tempfile().unwrap();
        {
            let mut sink = DownloadSink::Plain(&mut file);
            sink.write_chunk(b"hello ").unwrap();
            sink.write_chunk(b"world").unwrap();
            sink.finish().unwrap();
        }
        let mut out = String::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_close_after_put_clears_caches() {
        let mut vio = WebdavVio::new(None);
        vio.seed_caches_for_test();
        let handle = TransferHandle {
            method: TransferMethod::Put,
            clean_uri: "/files/a.bin".to_string(),
        };
        vio.close(handle).unwrap();
        assert!(vio.caches_empty_for_test());
    }

    #[test]
    fn test_close_after_get_keeps_caches() {
        let mut vio = WebdavVio::new(None);
        vio.seed_caches_for_test();
        let handle = TransferHandle {
            method: TransferMethod::Get,
            clean_uri: "/files/a.bin".to_string(),
        };
        vio.close(handle).unwrap();
        assert!(!vio.caches_empty_for_test());
    }

    #[test]
    fn test_stubs_are_inert() {
        let mut vio = WebdavVio::new(None);
        let handle = TransferHandle {
            method: TransferMethod::Get,
            clean_uri: "/x".to_string(),
        };
        let mut buf = [0u8; 16];
        assert_eq!(vio.read(&handle, &mut buf).unwrap(), 0);
        assert_eq!(vio.write(&handle, b"data").unwrap(), 0);
        assert!(vio.lseek(&handle, 10).is_err());
    }
}
