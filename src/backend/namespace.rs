//! Namespace mutations: create, delete, move, and touch remote
//! entries.
//!
//! Every successful mutation invalidates all caches before returning,
//! so the next read observes the server's state instead of ours.

use reqwest::Method;
use tracing::{debug, warn};

use crate::types::error::{map_http_status, VioError};
use crate::uri;

use super::WebdavVio;

/// MKCOL wants the collection path with a trailing slash.
fn collection_path(curi: &str) -> String {
    if curi.ends_with('/') {
        curi.to_string()
    } else {
        format!("{}/", curi)
    }
}

/// PROPPATCH body setting `DAV:lastmodified` to epoch seconds.
fn proppatch_lastmodified_body(mtime: i64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<d:propertyupdate xmlns:d="DAV:">
  <d:set>
    <d:prop>
      <d:lastmodified>{}</d:lastmodified>
    </d:prop>
  </d:set>
</d:propertyupdate>"#,
        mtime
    )
}

impl WebdavVio {
    fn clean_or_fail(&mut self, uri_str: &str) -> Result<String, VioError> {
        let curi = uri::clean(uri_str);
        if curi.is_empty() {
            let err = VioError::InvalidArgument(format!("cannot clean path: {}", uri_str));
            return Err(self.session.fail(err));
        }
        Ok(curi)
    }

    fn check_status(&mut self, status: reqwest::StatusCode, what: &str) -> Result<(), VioError> {
        if let Err(err) = map_http_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or(what),
        ) {
            warn!(status = status.as_u16(), what, "request failed");
            return Err(self.session.fail(err));
        }
        Ok(())
    }

    /// Create a collection.
    pub async fn mkdir(&mut self, uri_str: &str) -> Result<(), VioError> {
        let curi = self.clean_or_fail(uri_str)?;
        self.session.connect(uri_str)?;

        let path = collection_path(&curi);
        debug!(path = %path, "MKCOL");
        let req = self
            .session
            .request(Method::from_bytes(b"MKCOL").unwrap(), &path)?;
        let resp = self.session.dispatch(req).await?;

        // MKCOL on an existing collection answers 405.
        if resp.status().as_u16() == 405 {
            let err = VioError::AlreadyExists(format!("collection exists: {}", path));
            return Err(self.session.fail(err));
        }
        self.check_status(resp.status(), "MKCOL failed")?;
        self.clear_caches();
        Ok(())
    }

    /// Remove a collection.
    pub async fn rmdir(&mut self, uri_str: &str) -> Result<(), VioError> {
        self.delete(uri_str).await
    }

    /// Remove a file.
    pub async fn unlink(&mut self, uri_str: &str) -> Result<(), VioError> {
        self.delete(uri_str).await
    }

    async fn delete(&mut self, uri_str: &str) -> Result<(), VioError> {
        let curi = self.clean_or_fail(uri_str)?;
        self.session.connect(uri_str)?;

        debug!(path = %curi, "DELETE");
        let req = self.session.request(Method::DELETE, &curi)?;
        let resp = self.session.dispatch(req).await?;
        self.check_status(resp.status(), "DELETE failed")?;
        self.clear_caches();
        Ok(())
    }

    /// Move an entry, replacing any destination.
    pub async fn rename(&mut self, old_uri: &str, new_uri: &str) -> Result<(), VioError> {
        self.session.connect(old_uri)?;
        let src = self.clean_or_fail(old_uri)?;
        let dst = self.clean_or_fail(new_uri)?;
        // MOVE wants an absolute Destination.
        let destination = url::Url::parse(&format!("{}{}", self.session.base_url()?, dst))
            .map_err(|e| {
                let err = VioError::InvalidArgument(format!("bad destination {}: {}", dst, e));
                self.session.fail(err)
            })?;

        debug!(src = %src, dst = %dst, "MOVE");
        let req = self
            .session
            .request(Method::from_bytes(b"MOVE").unwrap(), &src)?
            .header("Destination", destination.as_str())
            .header("Overwrite", "T");
        let resp = self.session.dispatch(req).await?;
        self.check_status(resp.status(), "MOVE failed")?;
        self.clear_caches();
        Ok(())
    }

    /// Set the remote modification time. The wire value carries the
    /// server's clock, so the current skew is added back.
    pub async fn utimes(&mut self, uri_str: &str, mtime: i64) -> Result<(), VioError> {
        let curi = self.clean_or_fail(uri_str)?;
        self.session.connect(uri_str)?;

        let wire_mtime = self.skew.to_server_mtime(mtime);
        debug!(path = %curi, mtime, wire_mtime, "PROPPATCH lastmodified");
        let req = self
            .session
            .request(Method::from_bytes(b"PROPPATCH").unwrap(), &curi)?
            .header(reqwest::header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(proppatch_lastmodified_body(wire_mtime));
        let resp = self.session.dispatch(req).await?;
        self.check_status(resp.status(), "PROPPATCH failed")?;
        self.clear_caches();
        Ok(())
    }

    /// The server has no POSIX permission model; accepted and ignored.
    pub fn chmod(&mut self, _uri: &str, _mode: u32) -> Result<(), VioError> {
        Ok(())
    }

    pub fn chown(&mut self, _uri: &str, _owner: u32, _group: u32) -> Result<(), VioError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_path_gets_trailing_slash() {
        assert_eq!(collection_path("/files/new"), "/files/new/");
        assert_eq!(collection_path("/files/new/"), "/files/new/");
    }

    #[test]
    fn test_proppatch_body_carries_epoch_seconds() {
        let body = proppatch_lastmodified_body(1_700_000_000);
        assert!(body.contains("<d:lastmodified>1700000000</d:lastmodified>"));
        assert!(body.contains("propertyupdate"));
    }

    #[test]
    fn test_chmod_chown_are_noops() {
        let mut vio = WebdavVio::new(None);
        assert!(vio.chmod("owncloud://h/f", 0o644).is_ok());
        assert!(vio.chown("owncloud://h/f", 1000, 1000).is_ok());
    }
}
