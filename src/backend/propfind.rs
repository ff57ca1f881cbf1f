//! PROPFIND: directory listings and the listing-context cache.
//!
//! One PROPFIND produces a [`ListingContext`], shared between the
//! single-slot cache and any open directory handle. The engine stats
//! every entry of a directory right after listing it; serving the
//! repeat PROPFIND from the cache is what keeps that pattern bearable.

use std::sync::Arc;

use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{CONTENT_TYPE, DATE, LOCATION};
use reqwest::Method;
use tracing::{debug, warn};

use crate::cache::strip_etag_quotes;
use crate::httpdate::parse_httpdate;
use crate::types::error::{map_http_status, VioError};
use crate::types::{stat_mode, FileStat, FileType};
use crate::uri;

use super::WebdavVio;

/// PROPFIND scope: the resource itself, or the resource plus its
/// direct children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
        }
    }
}

/// What a multistatus entry turned out to be. References and error
/// entries are never surfaced to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Normal,
    Collection,
    Reference,
    Error,
}

/// One remote entry discovered by PROPFIND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Percent-decoded absolute path on the server.
    pub uri: String,
    /// Last path segment.
    pub name: String,
    pub kind: ResourceType,
    /// Byte size; collections carry none.
    pub size: Option<i64>,
    /// Server-side modification time, UTC epoch seconds.
    pub modtime: i64,
    /// Content fingerprint, outer quotes stripped.
    pub etag: Option<String>,
}

/// The parsed result of one PROPFIND, shared between the cache slot
/// and open directory handles.
#[derive(Debug)]
pub struct ListingContext {
    /// The cleaned (escaped) request path.
    pub target: String,
    /// Entries in reverse arrival order.
    pub list: Vec<Resource>,
}

/// An open directory: a listing context plus a read cursor.
#[derive(Debug)]
pub struct DirHandle {
    pub(crate) ctx: Arc<ListingContext>,
    pub(crate) cursor: usize,
}

/// The four properties every listing asks for.
const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:getlastmodified/>
    <d:getcontentlength/>
    <d:resourcetype/>
    <d:getetag/>
  </d:prop>
</d:propfind>"#;

const NOT_XML_MESSAGE: &str = "Server error: PROPFIND reply is not XML formatted!";

/// Per-response accumulator while walking the multistatus document.
#[derive(Default)]
struct PendingEntry {
    href: Option<String>,
    modtime: Option<String>,
    length: Option<String>,
    etag: Option<String>,
    is_collection: bool,
}

impl PendingEntry {
    fn into_resource(self) -> Option<Resource> {
        let href = self.href?;
        let decoded = uri::unescape(&href);
        // A collection has a resourcetype of <DAV:collection> and no
        // content length.
        let kind = if self.is_collection && self.length.is_none() {
            ResourceType::Collection
        } else {
            ResourceType::Normal
        };
        let size = match kind {
            ResourceType::Collection => None,
            _ => Some(
                self.length
                    .as_deref()
                    .and_then(|l| l.trim().parse::<i64>().ok())
                    .unwrap_or(0),
            ),
        };
        Some(Resource {
            name: uri::basename(&decoded),
            uri: decoded,
            kind,
            size,
            modtime: self.modtime.as_deref().map(parse_httpdate).unwrap_or(0),
            etag: self.etag.as_deref().map(strip_etag_quotes),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Href,
    Modtime,
    Length,
    Etag,
}

/// Parse a multistatus body into resources, reverse arrival order.
pub(crate) fn parse_multistatus(xml: &str) -> Result<Vec<Resource>, VioError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut resources = Vec::new();
    let mut in_response = false;
    let mut in_resourcetype = false;
    let mut field: Option<Field> = None;
    let mut pending = PendingEntry::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => {
                    in_response = true;
                    pending = PendingEntry::default();
                }
                b"href" if in_response => field = Some(Field::Href),
                b"getlastmodified" if in_response => field = Some(Field::Modtime),
                b"getcontentlength" if in_response => field = Some(Field::Length),
                b"getetag" if in_response => field = Some(Field::Etag),
                b"resourcetype" if in_response => in_resourcetype = true,
                b"collection" if in_resourcetype => pending.is_collection = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if in_resourcetype && e.local_name().as_ref() == b"collection" {
                    pending.is_collection = true;
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(f) = field {
                    let value = t.unescape().unwrap_or_default().to_string();
                    match f {
                        Field::Href => pending.href = Some(value),
                        Field::Modtime => pending.modtime = Some(value),
                        Field::Length => pending.length = Some(value),
                        Field::Etag => pending.etag = Some(value),
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    in_response = false;
                    if let Some(res) = std::mem::take(&mut pending).into_resource() {
                        resources.push(res);
                    }
                }
                b"resourcetype" => in_resourcetype = false,
                b"href" | b"getlastmodified" | b"getcontentlength" | b"getetag" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(VioError::WrongContent(format!(
                    "{} ({})",
                    NOT_XML_MESSAGE, e
                )));
            }
            _ => {}
        }
    }

    // The original prepends each entry to a list; readers see reverse
    // arrival order.
    resources.reverse();
    Ok(resources)
}

/// Convert a resource to the engine's stat view, correcting the mtime
/// for server clock skew.
pub(crate) fn resource_to_stat(res: &Resource, skew: &crate::skew::ClockSkew) -> FileStat {
    let kind = match res.kind {
        ResourceType::Collection => FileType::Directory,
        _ => FileType::Regular,
    };
    FileStat {
        name: res.name.clone(),
        kind,
        size: res.size,
        mtime: skew.to_engine_mtime(res.modtime),
        mode: stat_mode(kind),
        etag: res.etag.clone(),
    }
}

impl WebdavVio {
    /// Fetch a resource list, serving repeats from the cache.
    ///
    /// The returned context is shared: the cache keeps one reference,
    /// the caller gets another.
    pub(crate) async fn fetch_resource_list(
        &mut self,
        uri_str: &str,
        depth: Depth,
    ) -> Result<Arc<ListingContext>, VioError> {
        let curi = uri::clean(uri_str);
        if curi.is_empty() {
            let err = VioError::InvalidArgument(format!("cannot clean path: {}", uri_str));
            return Err(self.session.fail(err));
        }

        if let Some(ctx) = &self.propfind_cache {
            if ctx.target == curi {
                debug!(target = %curi, "serving listing from cache");
                return Ok(Arc::clone(ctx));
            }
        }

        debug!(target = %curi, depth = depth.as_str(), "issuing PROPFIND");
        let req = self
            .session
            .request(Method::from_bytes(b"PROPFIND").unwrap(), &curi)?
            .header("Depth", depth.as_str())
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);

        let resp = self.session.dispatch(req).await?;
        let status = resp.status();

        if status.is_redirection() {
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("<no location>");
            let err = VioError::Redirected(format!("{} redirected to {}", curi, location));
            return Err(self.session.fail(err));
        }
        if let Err(err) = map_http_status(
            status.as_u16(),
            status.canonical_reason().unwrap_or("PROPFIND failed"),
        ) {
            warn!(target = %curi, status = status.as_u16(), "PROPFIND failed");
            return Err(self.session.fail(err));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if content_type != "application/xml; charset=utf-8" {
            let err = VioError::WrongContent(NOT_XML_MESSAGE.to_string());
            return Err(self.session.fail(err));
        }

        // Learn the server clock offset from this response.
        if let Some(date) = resp.headers().get(DATE).and_then(|v| v.to_str().ok()) {
            let server = parse_httpdate(date);
            if server != 0 {
                self.skew.update(server, Utc::now().timestamp());
            }
        }

        let body = resp
            .text()
            .await
            .map_err(|e| self.session.fail(VioError::Io(e.to_string())))?;
        let list = parse_multistatus(&body).map_err(|e| self.session.fail(e))?;

        debug!(target = %curi, entries = list.len(), "PROPFIND parsed");
        let ctx = Arc::new(ListingContext { target: curi, list });
        self.propfind_cache = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Open a directory for iteration: connect, list depth 1, cursor at
    /// the head.
    pub async fn opendir(&mut self, uri_str: &str) -> Result<DirHandle, VioError> {
        self.session.connect(uri_str)?;
        let ctx = self.fetch_resource_list(uri_str, Depth::One).await?;
        Ok(DirHandle { ctx, cursor: 0 })
    }

    /// Produce the next entry of an open directory, skipping the
    /// collection itself. Fills the stat cache with what it returns.
    pub fn readdir(&mut self, handle: &mut DirHandle) -> Option<FileStat> {
        let target_decoded = uri::unescape(&handle.ctx.target);
        while let Some(res) = handle.ctx.list.get(handle.cursor) {
            handle.cursor += 1;
            if uri::paths_equal(&res.uri, &target_decoded) {
                continue;
            }
            match res.kind {
                ResourceType::Normal | ResourceType::Collection => {}
                ResourceType::Reference | ResourceType::Error => continue,
            }
            let stat = resource_to_stat(res, &self.skew);
            self.stat_cache.store(stat.clone());
            return Some(stat);
        }
        None
    }

    /// Release a directory handle. The listing context is destroyed
    /// once the cache slot and every reader let go.
    pub fn closedir(&mut self, handle: DirHandle) {
        drop(handle);
    }
}
