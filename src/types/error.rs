use thiserror::Error;

/// Filesystem-style error kinds returned by every VIO operation.
///
/// The sync engine treats these like errno values: it decides per kind
/// whether to skip the file, retry, or abort the run. The `Display`
/// string doubles as the human-readable message surfaced through
/// `get_error_string`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VioError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("No such file or directory: {0}")]
    NoSuchEntry(String),

    #[error("File exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource temporarily unavailable: {0}")]
    TryAgain(String),

    #[error("No space left on server: {0}")]
    NoSpace(String),

    #[error("Entity too large: {0}")]
    TooLarge(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Host lookup failed: {0}")]
    LookupFailed(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Proxy authentication required: {0}")]
    ProxyAuth(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Retry request: {0}")]
    Retry(String),

    #[error("Redirected: {0}")]
    Redirected(String),

    #[error("Wrong content: {0}")]
    WrongContent(String),

    #[error("Bad file descriptor: {0}")]
    BadFd(String),

    #[error("Out of memory: {0}")]
    NoMemory(String),

    #[error("{0}")]
    Generic(String),
}

/// Transport-level failure kinds, as reported by the HTTP layer before
/// any status code is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Ok,
    Generic,
    Lookup,
    Auth,
    ProxyAuth,
    Connect,
    Timeout,
    Precondition,
    Retry,
    Redirect,
}

/// Map an HTTP status code to a VIO error. `Ok(())` for 2xx and 304.
///
/// `detail` ends up in the error message; callers pass the status line
/// or the server's reason phrase.
pub fn map_http_status(code: u16, detail: &str) -> Result<(), VioError> {
    let msg = || format!("{} ({})", detail, code);
    match code {
        200..=299 | 304 => Ok(()),
        401 | 402 | 405 | 407 => Err(VioError::PermissionDenied(msg())),
        301 | 303 | 404 | 410 => Err(VioError::NoSuchEntry(msg())),
        408 | 504 => Err(VioError::TryAgain(msg())),
        423 => Err(VioError::AccessDenied(msg())),
        400 | 403 | 409 | 411 | 412 | 414 | 415 | 424 | 501 => {
            Err(VioError::InvalidArgument(msg()))
        }
        507 => Err(VioError::NoSpace(msg())),
        413 => Err(VioError::TooLarge(msg())),
        503 => Err(VioError::ServiceUnavailable(msg())),
        _ => Err(VioError::Io(msg())),
    }
}

/// Map a transport failure kind to a VIO error.
///
/// `Generic` is resolved through [`from_error_string`]: the session's
/// last error text usually starts with the HTTP status the transport
/// saw, so the status table applies.
pub fn map_transport(kind: TransportFailure, last_error: &str) -> Result<(), VioError> {
    let msg = last_error.to_string();
    match kind {
        TransportFailure::Ok => Ok(()),
        TransportFailure::Lookup => Err(VioError::LookupFailed(msg)),
        TransportFailure::Auth => Err(VioError::UnknownUser(msg)),
        TransportFailure::ProxyAuth => Err(VioError::ProxyAuth(msg)),
        TransportFailure::Connect => Err(VioError::ConnectFailed(msg)),
        TransportFailure::Timeout => Err(VioError::Timeout(msg)),
        TransportFailure::Precondition => Err(VioError::PreconditionFailed(msg)),
        TransportFailure::Retry => Err(VioError::Retry(msg)),
        TransportFailure::Redirect => Err(VioError::Redirected(msg)),
        TransportFailure::Generic => Err(from_error_string(last_error)),
    }
}

/// Resolve an opaque error string by parsing a leading integer as an
/// HTTP status. Strings that do not start with a status map to an I/O
/// error.
pub fn from_error_string(last_error: &str) -> VioError {
    let trimmed = last_error.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u16>() {
        Ok(code) => match map_http_status(code, last_error) {
            // A leading 2xx/304 in an *error* string is still a failure.
            Ok(()) => VioError::Io(last_error.to_string()),
            Err(e) => e,
        },
        Err(_) => VioError::Io(last_error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses() {
        assert!(map_http_status(200, "OK").is_ok());
        assert!(map_http_status(207, "Multi-Status").is_ok());
        assert!(map_http_status(304, "Not Modified").is_ok());
    }

    #[test]
    fn test_auth_statuses_are_permission_denied() {
        for code in [401, 402, 405, 407] {
            assert!(matches!(
                map_http_status(code, "x"),
                Err(VioError::PermissionDenied(_))
            ));
        }
    }

    #[test]
    fn test_missing_statuses_are_no_such_entry() {
        for code in [301, 303, 404, 410] {
            assert!(matches!(
                map_http_status(code, "x"),
                Err(VioError::NoSuchEntry(_))
            ));
        }
    }

    #[test]
    fn test_storage_and_size_statuses() {
        assert!(matches!(map_http_status(507, "x"), Err(VioError::NoSpace(_))));
        assert!(matches!(map_http_status(413, "x"), Err(VioError::TooLarge(_))));
        assert!(matches!(
            map_http_status(503, "x"),
            Err(VioError::ServiceUnavailable(_))
        ));
        assert!(matches!(map_http_status(423, "x"), Err(VioError::AccessDenied(_))));
        assert!(matches!(map_http_status(408, "x"), Err(VioError::TryAgain(_))));
    }

    #[test]
    fn test_unlisted_statuses_are_io_errors() {
        for code in [300, 302, 500, 502, 505] {
            assert!(matches!(map_http_status(code, "x"), Err(VioError::Io(_))));
        }
    }

    #[test]
    fn test_transport_kinds_map_directly() {
        assert!(matches!(
            map_transport(TransportFailure::Lookup, "no dns"),
            Err(VioError::LookupFailed(_))
        ));
        assert!(matches!(
            map_transport(TransportFailure::Auth, "bad user"),
            Err(VioError::UnknownUser(_))
        ));
        assert!(matches!(
            map_transport(TransportFailure::Timeout, "30s"),
            Err(VioError::Timeout(_))
        ));
        assert!(matches!(
            map_transport(TransportFailure::Redirect, "moved"),
            Err(VioError::Redirected(_))
        ));
        assert!(map_transport(TransportFailure::Ok, "").is_ok());
    }

    #[test]
    fn test_generic_parses_leading_status() {
        assert!(matches!(
            map_transport(TransportFailure::Generic, "404 Not Found"),
            Err(VioError::NoSuchEntry(_))
        ));
        assert!(matches!(
            map_transport(TransportFailure::Generic, "could not connect"),
            Err(VioError::Io(_))
        ));
    }

    #[test]
    fn test_error_string_with_success_prefix_is_io() {
        assert!(matches!(from_error_string("200 but broken"), VioError::Io(_)));
    }
}
