use std::io;

use http::{HeaderMap, StatusCode};
use thiserror::Error;
use tower_http::BoxError;

use crate::serve_static::{response_with_status, ResponseBody};

/// Error signalled by the file stream, always tied to an HTTP status.
#[derive(Debug, Error)]
#[error("failed to send file: {status}")]
pub struct SendError {
    status: StatusCode,
    headers: HeaderMap,
    #[source]
    source: Option<io::Error>,
}

impl SendError {
    pub(crate) fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            source: None,
        }
    }

    pub(crate) fn with_source(status: StatusCode, source: io::Error) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            source: Some(source),
        }
    }

    pub(crate) fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Map a failed `stat`/`open` to `404` for missing paths and `500` for the rest.
    pub(crate) fn from_io(err: io::Error) -> Self {
        let status = match err.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::NotADirectory
            | io::ErrorKind::InvalidFilename => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self::with_source(status, err)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers that belong on the error response, e.g. `Content-Range` for a `416`.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Client errors are the ones a later service may still be able to answer.
    pub fn is_client_error(&self) -> bool {
        self.status.as_u16() < 500
    }
}

/// Error returned by [`ServeStatic`](crate::ServeStatic).
#[derive(Debug, Error)]
pub enum ServeStaticError {
    /// The request could not be answered from the filesystem.
    #[error(transparent)]
    Send(#[from] SendError),
    /// The next service failed.
    #[error("next service failed: {0}")]
    Next(#[source] BoxError),
}

impl ServeStaticError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServeStaticError::Send(err) => err.status(),
            ServeStaticError::Next(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the error as an empty response carrying its status and headers.
    ///
    /// Useful at the end of a service stack that needs an infallible service.
    pub fn into_response(self) -> http::Response<ResponseBody> {
        let mut res = response_with_status(self.status());
        if let ServeStaticError::Send(err) = self {
            res.headers_mut().extend(err.headers);
        }

        res
    }
}
