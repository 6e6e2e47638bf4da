//! Resolves a request path inside the root and streams the file it names.
//!
//! The stream doesn't decide what happens on a directory or on an error. It reports those
//! through [`SendEvents`], and whoever drives it decides whether to redirect, respond, or hand
//! the request on.

use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, ETAG, LAST_MODIFIED, RANGE,
};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use mime_guess::mime;
use percent_encoding::percent_decode_str;
use tokio::fs::{self, File};
use tokio::io::AsyncSeekExt;

use crate::error::SendError;
use crate::options::{Config, Dotfiles};
use crate::serve_static::{empty_body, ResponseBody};

use self::body::FileBody;

mod body;
mod conditional;

/// Reactions registered on a [`SendStream`].
pub(crate) trait SendEvents {
    /// What an error turns into once the driver has looked at it.
    type Forward;

    /// The path names a directory. Either respond, or signal an error through the stream.
    fn directory(
        &mut self,
        stream: &SendStream,
        path: &Path,
    ) -> Result<Response<ResponseBody>, SendError>;

    /// Called before the stream fills in its own headers.
    fn headers(&mut self, headers: &mut HeaderMap, path: &Path, stat: &Metadata);

    /// A concrete file was picked and is about to be sent.
    fn file(&mut self, path: &Path, stat: &Metadata);

    fn error(&mut self, err: SendError) -> Self::Forward;
}

/// Everything from [`Config`] the stream needs, plus the root it serves from.
#[derive(Debug, Clone)]
pub(crate) struct SendOptions {
    root: PathBuf,
    accept_ranges: bool,
    cache_control: bool,
    dotfiles: Option<Dotfiles>,
    etag: bool,
    extensions: Vec<String>,
    immutable: bool,
    index: Vec<String>,
    last_modified: bool,
    max_age: Duration,
    chunk_size: usize,
}

impl SendOptions {
    pub(crate) fn new(root: PathBuf, config: &Config, chunk_size: usize) -> Self {
        Self {
            root,
            accept_ranges: config.accept_ranges,
            cache_control: config.cache_control,
            dotfiles: config.dotfiles,
            etag: config.etag,
            extensions: config.extensions.list().to_vec(),
            immutable: config.immutable,
            index: config.index.files().to_vec(),
            last_modified: config.last_modified,
            max_age: config.max_age.as_duration(),
            chunk_size,
        }
    }

    pub(crate) fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
    }
}

#[derive(Debug)]
pub(crate) struct SendStream {
    method: Method,
    headers: HeaderMap,
    path: String,
    options: Arc<SendOptions>,
}

impl SendStream {
    pub(crate) fn new(
        method: Method,
        headers: HeaderMap,
        path: impl Into<String>,
        options: Arc<SendOptions>,
    ) -> Self {
        Self {
            method,
            headers,
            path: path.into(),
            options,
        }
    }

    /// Whether the lookup path, as requested, ends with `/`.
    pub(crate) fn has_trailing_slash(&self) -> bool {
        self.path.ends_with('/')
    }

    pub(crate) fn error(&self, status: StatusCode) -> SendError {
        SendError::new(status)
    }

    /// Resolve the path and build the response, reporting to `events` along the way.
    ///
    /// Errors are never answered here: they are passed to [`SendEvents::error`] and its
    /// verdict is returned.
    pub(crate) async fn pipe<E: SendEvents>(
        self,
        events: &mut E,
    ) -> Result<Response<ResponseBody>, E::Forward> {
        match self.run(events).await {
            Ok(res) => Ok(res),
            Err(err) => Err(events.error(err)),
        }
    }

    async fn run<E: SendEvents>(
        &self,
        events: &mut E,
    ) -> Result<Response<ResponseBody>, SendError> {
        let relative = self.relative_path()?;

        if contains_dotfile(&relative) {
            match self.options.dotfiles {
                Some(Dotfiles::Allow) => {}
                Some(Dotfiles::Deny) => return Err(self.error(StatusCode::FORBIDDEN)),
                Some(Dotfiles::Ignore) => return Err(self.error(StatusCode::NOT_FOUND)),
                None if last_segment_is_dotfile(&relative) => {
                    return Err(self.error(StatusCode::NOT_FOUND))
                }
                None => {}
            }
        }

        let path = self.options.root.join(&relative);

        if !self.options.index.is_empty() && self.has_trailing_slash() {
            return self.send_index(path, events).await;
        }

        self.send_file(path, events).await
    }

    /// Decode the lookup path and resolve `.` and `..` without leaving the root.
    fn relative_path(&self) -> Result<String, SendError> {
        let decoded = percent_decode_str(&self.path)
            .decode_utf8()
            .map_err(|_| self.error(StatusCode::BAD_REQUEST))?;

        if decoded.contains('\0') {
            return Err(self.error(StatusCode::BAD_REQUEST));
        }

        let mut segments = Vec::new();
        for segment in decoded.split('/') {
            if segment.contains('\\') {
                tracing::debug!(path = %self.path, "backslash in path segment");
                return Err(self.error(StatusCode::NOT_FOUND));
            }

            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        tracing::debug!(path = %self.path, "path escapes the root");
                        return Err(self.error(StatusCode::FORBIDDEN));
                    }
                }
                segment => segments.push(segment),
            }
        }

        let mut relative = segments.join("/");
        if decoded.ends_with('/') && !relative.is_empty() {
            relative.push('/');
        }

        Ok(relative)
    }

    async fn send_file<E: SendEvents>(
        &self,
        path: PathBuf,
        events: &mut E,
    ) -> Result<Response<ResponseBody>, SendError> {
        let err = match fs::metadata(&path).await {
            Ok(stat) if stat.is_dir() => return events.directory(self, &path),
            Ok(stat) => {
                events.file(&path, &stat);
                return self.send(&path, stat, events).await;
            }
            Err(err) => err,
        };

        let ends_with_separator = path.as_os_str().to_string_lossy().ends_with('/');
        if err.kind() != std::io::ErrorKind::NotFound
            || path.extension().is_some()
            || ends_with_separator
        {
            return Err(SendError::from_io(err));
        }

        let mut last_err = Some(err);
        for extension in &self.options.extensions {
            let mut candidate = path.clone().into_os_string();
            candidate.push(".");
            candidate.push(extension);
            let candidate = PathBuf::from(candidate);

            tracing::trace!(path = %candidate.display(), "trying extension");

            match fs::metadata(&candidate).await {
                Ok(stat) if stat.is_dir() => last_err = None,
                Ok(stat) => {
                    events.file(&candidate, &stat);
                    return self.send(&candidate, stat, events).await;
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.map_or_else(|| self.error(StatusCode::NOT_FOUND), SendError::from_io))
    }

    async fn send_index<E: SendEvents>(
        &self,
        dir: PathBuf,
        events: &mut E,
    ) -> Result<Response<ResponseBody>, SendError> {
        let mut last_err = None;
        for name in &self.options.index {
            let candidate = dir.join(name);

            tracing::trace!(path = %candidate.display(), "trying index file");

            match fs::metadata(&candidate).await {
                Ok(stat) if stat.is_dir() => last_err = None,
                Ok(stat) => {
                    events.file(&candidate, &stat);
                    return self.send(&candidate, stat, events).await;
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.map_or_else(|| self.error(StatusCode::NOT_FOUND), SendError::from_io))
    }

    async fn send<E: SendEvents>(
        &self,
        path: &Path,
        stat: Metadata,
        events: &mut E,
    ) -> Result<Response<ResponseBody>, SendError> {
        let mut headers = HeaderMap::new();
        events.headers(&mut headers, path, &stat);
        self.fill_headers(&mut headers, path, &stat)?;

        if conditional::is_conditional_get(&self.headers) {
            if conditional::is_precondition_failure(&self.headers, &headers) {
                return Err(self.error(StatusCode::PRECONDITION_FAILED));
            }

            if conditional::is_fresh(&self.headers, &headers) {
                return Ok(not_modified(headers));
            }
        }

        let size = stat.len();
        let mut status = StatusCode::OK;
        let mut offset = 0;
        let mut len = size;

        if let Some(range) = self.range_header() {
            if conditional::is_range_fresh(&self.headers, &headers) {
                // a malformed header is ignored and the whole file is sent
                match http_range_header::parse_range_header(range) {
                    Err(_) => {
                        tracing::debug!(range, "ignoring malformed range header");
                    }
                    Ok(ranges) => {
                        let satisfiable = if size == 0 {
                            None
                        } else {
                            ranges.validate(size).ok()
                        };

                        match satisfiable {
                            // several ranges are answered with the whole file
                            Some(ranges) => {
                                if let [range] = ranges.as_slice() {
                                    status = StatusCode::PARTIAL_CONTENT;
                                    offset = *range.start();
                                    len = range.end() - range.start() + 1;
                                    headers.insert(
                                        CONTENT_RANGE,
                                        self.header_value(format!(
                                            "bytes {}-{}/{}",
                                            range.start(),
                                            range.end(),
                                            size
                                        ))?,
                                    );
                                }
                            }
                            None => {
                                let mut error_headers = HeaderMap::new();
                                error_headers.insert(
                                    CONTENT_RANGE,
                                    self.header_value(format!("bytes */{size}"))?,
                                );

                                return Err(self
                                    .error(StatusCode::RANGE_NOT_SATISFIABLE)
                                    .with_headers(error_headers));
                            }
                        }
                    }
                }
            }
        }

        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));

        if self.method == Method::HEAD {
            return Ok(build_response(status, headers, empty_body()));
        }

        let mut file = File::open(path).await.map_err(SendError::from_io)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(SendError::from_io)?;
        }

        let body = ResponseBody::new(FileBody::new(file, self.options.chunk_size, len));

        Ok(build_response(status, headers, body))
    }

    fn range_header(&self) -> Option<&str> {
        if !self.options.accept_ranges {
            return None;
        }

        self.headers
            .get(RANGE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim_start)
            .filter(|value| value.starts_with("bytes="))
    }

    /// Headers the caller's hook didn't already set.
    fn fill_headers(
        &self,
        headers: &mut HeaderMap,
        path: &Path,
        stat: &Metadata,
    ) -> Result<(), SendError> {
        let options = &self.options;

        if options.accept_ranges && !headers.contains_key(ACCEPT_RANGES) {
            headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }

        if options.cache_control && !headers.contains_key(CACHE_CONTROL) {
            let mut value = format!("public, max-age={}", options.max_age.as_secs());
            if options.immutable {
                value.push_str(", immutable");
            }
            headers.insert(CACHE_CONTROL, self.header_value(value)?);
        }

        if options.last_modified && !headers.contains_key(LAST_MODIFIED) {
            if let Ok(modified) = stat.modified() {
                headers.insert(
                    LAST_MODIFIED,
                    self.header_value(httpdate::fmt_http_date(modified))?,
                );
            }
        }

        if options.etag && !headers.contains_key(ETAG) {
            headers.insert(ETAG, self.header_value(conditional::etag(stat))?);
        }

        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, self.header_value(content_type(path))?);
        }

        Ok(())
    }

    fn header_value(&self, value: String) -> Result<HeaderValue, SendError> {
        HeaderValue::from_str(&value).map_err(|_| self.error(StatusCode::INTERNAL_SERVER_ERROR))
    }
}

fn contains_dotfile(relative: &str) -> bool {
    relative
        .split('/')
        .any(|segment| segment.len() > 1 && segment.starts_with('.'))
}

fn last_segment_is_dotfile(relative: &str) -> bool {
    relative
        .rsplit('/')
        .next()
        .is_some_and(|segment| segment.starts_with('.'))
}

fn content_type(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let textual = mime.type_() == mime::TEXT
        || (mime.type_() == mime::APPLICATION
            && matches!(mime.subtype().as_str(), "javascript" | "json"));

    if textual {
        format!("{}; charset=UTF-8", mime.essence_str())
    } else {
        mime.essence_str().to_owned()
    }
}

fn not_modified(mut headers: HeaderMap) -> Response<ResponseBody> {
    for name in [
        CONTENT_ENCODING,
        CONTENT_LANGUAGE,
        CONTENT_LENGTH,
        CONTENT_RANGE,
        CONTENT_TYPE,
    ] {
        headers.remove(name);
    }

    build_response(StatusCode::NOT_MODIFIED, headers, empty_body())
}

fn build_response(
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
) -> Response<ResponseBody> {
    let mut res = Response::new(body);
    *res.status_mut() = status;
    *res.headers_mut() = headers;
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(path: &str) -> SendStream {
        let options = SendOptions::new("/srv".into(), &Config::default(), 1024);
        SendStream::new(Method::GET, HeaderMap::new(), path, Arc::new(options))
    }

    #[test]
    fn relative_path_normalization() {
        assert_eq!(stream("/a/b.txt").relative_path().unwrap(), "a/b.txt");
        assert_eq!(stream("/a/./b/../c").relative_path().unwrap(), "a/c");
        assert_eq!(stream("/a/").relative_path().unwrap(), "a/");
        assert_eq!(stream("/").relative_path().unwrap(), "");
        assert_eq!(stream("").relative_path().unwrap(), "");
        assert_eq!(stream("/a%20b").relative_path().unwrap(), "a b");
    }

    #[test]
    fn relative_path_rejections() {
        let err = stream("/../etc/passwd").relative_path().unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = stream("/a/%2e%2e/%2e%2e/x").relative_path().unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = stream("/a%00b").relative_path().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = stream("/%ff").relative_path().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = stream("/a%5Cb").relative_path().unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = stream("/a\\..\\..\\x").relative_path().unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn trailing_slash() {
        assert!(stream("/dir/").has_trailing_slash());
        assert!(!stream("/dir").has_trailing_slash());
        assert!(!stream("").has_trailing_slash());
    }

    #[test]
    fn dotfile_detection() {
        assert!(contains_dotfile(".env"));
        assert!(contains_dotfile("a/.git/config"));
        assert!(!contains_dotfile("a/b.txt"));
        assert!(!contains_dotfile(""));

        assert!(last_segment_is_dotfile(".env"));
        assert!(last_segment_is_dotfile("a/.env"));
        assert!(!last_segment_is_dotfile(".well-known/x.txt"));
        assert!(!last_segment_is_dotfile(".well-known/"));
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("a.html")), "text/html; charset=UTF-8");
        assert_eq!(content_type(Path::new("a.png")), "image/png");
        assert_eq!(content_type(Path::new("a")), "application/octet-stream");
    }
}
