use std::convert::Infallible;
use std::fs::Metadata;
use std::future::Ready;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::TryFutureExt;
use http::header::{ALLOW, CONTENT_LENGTH};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body::{combinators::UnsyncBoxBody, Body, Empty, Full};
use tower_http::set_status::SetStatus;
use tower_http::BoxError;
use tower_service::Service;

use crate::completion::{notify_on_finish, OnComplete, RequestHead, ResponseHead};
use crate::directory::DirectoryListener;
use crate::error::{SendError, ServeStaticError};
use crate::options::{Config, ServeStaticOptions, SetHeaders};
use crate::send::{SendEvents, SendOptions, SendStream};
use crate::state::{Disposition, RequestContext};

// default capacity 64KiB
const DEFAULT_CAPACITY: usize = 65536;

pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

/// The request URI before a router stripped its mount prefix.
///
/// Routers that nest services under a path should insert this into the request extensions, so
/// that directory redirects point at the full URL. Without it the request URI is taken as is.
#[derive(Debug, Clone)]
pub struct OriginalUri(pub Uri);

/// Service that serves files from a root directory and all its sub directories.
///
/// Only `GET` and `HEAD` are served. With the default `fallthrough`, anything this service
/// can't answer (other methods, missing files, denied dotfiles) is passed to the fallback
/// service, which defaults to an empty `404 Not Found`.
///
/// # Example
///
/// ```
/// use serve_static::{ServeStatic, ServeStaticOptions};
///
/// // This will serve files in the "assets" directory and
/// // its subdirectories, failing instead of falling through
/// let service = ServeStatic::with_options(
///     "assets",
///     ServeStaticOptions::new().fallthrough(false).max_age("1d"),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ServeStatic<F = DefaultServeStaticFallback> {
    config: Arc<Config>,
    send_options: Arc<SendOptions>,
    on_complete: Option<OnComplete>,
    fallback: Option<F>,
}

impl ServeStatic<DefaultServeStaticFallback> {
    /// Create a new [`ServeStatic`] with the default options.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self::with_options(root, ServeStaticOptions::default())
    }

    /// Create a new [`ServeStatic`], overlaying `options` on the defaults.
    ///
    /// The options are resolved once here and shared by every request.
    pub fn with_options<P: Into<PathBuf>>(root: P, options: ServeStaticOptions) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        let config = Config::resolve(&options);
        let send_options = SendOptions::new(root, &config, DEFAULT_CAPACITY);

        Self {
            config: Arc::new(config),
            send_options: Arc::new(send_options),
            on_complete: None,
            fallback: None,
        }
    }
}

impl<F> ServeStatic<F> {
    /// The resolved configuration this service runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Call `callback` after each successful response from the filesystem, with the path of
    /// the file that was served.
    pub fn on_complete<C>(mut self, callback: C) -> Self
    where
        C: Fn(&RequestHead, &ResponseHead, &Path) + Send + Sync + 'static,
    {
        self.on_complete = Some(OnComplete::new(callback));
        self
    }

    /// Set a specific read buffer chunk size.
    ///
    /// The default capacity is 64kb.
    pub fn with_buf_chunk_size(mut self, chunk_size: usize) -> Self {
        Arc::make_mut(&mut self.send_options).set_chunk_size(chunk_size);
        self
    }

    /// Set the service called when this one falls through.
    ///
    /// The status code returned by the fallback will not be altered. Use
    /// [`ServeStatic::not_found_service`] to set a fallback and always respond with
    /// `404 Not Found`.
    pub fn fallback<F2>(self, new_fallback: F2) -> ServeStatic<F2> {
        ServeStatic {
            config: self.config,
            send_options: self.send_options,
            on_complete: self.on_complete,
            fallback: Some(new_fallback),
        }
    }

    /// Set the fallback service and override the fallback's status code to `404 Not Found`.
    ///
    /// Setups like this are often found in single page applications.
    pub fn not_found_service<F2>(self, new_fallback: F2) -> ServeStatic<SetStatus<F2>> {
        self.fallback(SetStatus::new(new_fallback, StatusCode::NOT_FOUND))
    }
}

impl<ReqBody, F, FResBody> Service<Request<ReqBody>> for ServeStatic<F>
where
    ReqBody: Send + 'static,
    F: Service<Request<ReqBody>, Response = Response<FResBody>> + Clone + Send + 'static,
    F::Error: Into<BoxError>,
    F::Future: Send,
    FResBody: Body<Data = Bytes> + Send + 'static,
    FResBody::Error: Into<BoxError>,
{
    type Response = Response<ResponseBody>;
    type Error = ServeStaticError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if let Some(fallback) = &mut self.fallback {
            fallback
                .poll_ready(cx)
                .map_err(|err| ServeStaticError::Next(err.into()))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // take the ready fallback and leave a non-ready clone in its place
        let fallback = self.fallback.as_mut().map(|fallback| {
            let clone = fallback.clone();
            std::mem::replace(fallback, clone)
        });

        Box::pin(serve(
            self.config.clone(),
            self.send_options.clone(),
            self.on_complete.clone(),
            fallback,
            req,
        ))
    }
}

async fn serve<ReqBody, F, FResBody>(
    config: Arc<Config>,
    send_options: Arc<SendOptions>,
    on_complete: Option<OnComplete>,
    fallback: Option<F>,
    req: Request<ReqBody>,
) -> Result<Response<ResponseBody>, ServeStaticError>
where
    F: Service<Request<ReqBody>, Response = Response<FResBody>>,
    F::Error: Into<BoxError>,
    FResBody: Body<Data = Bytes> + Send + 'static,
    FResBody::Error: Into<BoxError>,
{
    if req.method() != Method::GET && req.method() != Method::HEAD {
        if config.fallthrough {
            tracing::debug!(method = %req.method(), "method not served, falling through");
            return call_next(fallback, req).await;
        }

        tracing::debug!(method = %req.method(), "method not allowed");
        return Ok(method_not_allowed());
    }

    let original_uri = req
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| req.uri().clone(), |original| original.0.clone());
    let lookup = lookup_path(req.uri().path(), original_uri.path());

    let mut driver = StreamDriver {
        context: RequestContext::new(lookup.clone(), config.fallthrough),
        listener: DirectoryListener::select(config.redirect, &original_uri),
        set_headers: config.set_headers.clone(),
        fallthrough: config.fallthrough,
    };

    let stream = SendStream::new(
        req.method().clone(),
        req.headers().clone(),
        lookup,
        send_options,
    );

    match stream.pipe(&mut driver).await {
        Ok(res) => {
            tracing::trace!(
                status = %res.status(),
                phase = ?driver.context.phase(),
                path = %driver.context.resolved_path().display(),
                "served from filesystem"
            );

            Ok(match on_complete {
                Some(callback) if !driver.context.had_error() => {
                    let head = RequestHead {
                        method: req.method().clone(),
                        uri: req.uri().clone(),
                        headers: req.headers().clone(),
                    };
                    notify_on_finish(res, callback, head, driver.context.into_resolved_path())
                }
                _ => res,
            })
        }
        Err(Next::Continue) => call_next(fallback, req).await,
        Err(Next::Fail(err)) => Err(err.into()),
    }
}

/// Lookup path for the file stream.
///
/// A request for exactly the mount point without a trailing slash (`/static` mounted at
/// `/static`) is looked up as `""` rather than `/`, so the directory gets redirected to its
/// canonical URL instead of being served as the root's index.
fn lookup_path(path: &str, original_path: &str) -> String {
    if path == "/" && !original_path.ends_with('/') {
        String::new()
    } else {
        path.to_owned()
    }
}

/// What the driver decided after the stream reported an error.
#[derive(Debug)]
enum Next {
    Continue,
    Fail(SendError),
}

/// Reacts to the file stream's events on behalf of one request.
struct StreamDriver {
    context: RequestContext,
    listener: DirectoryListener,
    set_headers: Option<SetHeaders>,
    fallthrough: bool,
}

impl SendEvents for StreamDriver {
    type Forward = Next;

    fn directory(
        &mut self,
        stream: &SendStream,
        _path: &Path,
    ) -> Result<Response<ResponseBody>, SendError> {
        self.context.directory_found();
        self.listener.on_directory(stream)
    }

    fn headers(&mut self, headers: &mut HeaderMap, path: &Path, stat: &Metadata) {
        if let Some(set_headers) = &self.set_headers {
            set_headers.call(headers, path, stat);
        }
    }

    fn file(&mut self, path: &Path, _stat: &Metadata) {
        if self.fallthrough {
            self.context.file_found(path);
        }
    }

    fn error(&mut self, err: SendError) -> Next {
        match self.context.errored(&err) {
            Disposition::Continue => {
                tracing::debug!(
                    status = %err.status(),
                    path = %self.context.lookup_path(),
                    "falling through"
                );
                Next::Continue
            }
            Disposition::Forward => {
                tracing::debug!(
                    status = %err.status(),
                    path = %self.context.lookup_path(),
                    "forwarding error"
                );
                Next::Fail(err)
            }
        }
    }
}

/// The default fallback service used with [`ServeStatic`].
#[derive(Debug, Clone, Copy)]
pub struct DefaultServeStaticFallback(Infallible);

impl<ReqBody> Service<Request<ReqBody>> for DefaultServeStaticFallback
where
    ReqBody: Send + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = io::Error;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.0 {}
    }

    fn call(&mut self, _req: Request<ReqBody>) -> Self::Future {
        match self.0 {}
    }
}

fn method_not_allowed() -> Response<ResponseBody> {
    let mut res = response_with_status(StatusCode::METHOD_NOT_ALLOWED);
    let headers = res.headers_mut();
    headers.insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));

    res
}

pub(crate) fn response_with_status(status: StatusCode) -> Response<ResponseBody> {
    let mut res = Response::new(empty_body());
    *res.status_mut() = status;
    res
}

pub(crate) fn empty_body() -> ResponseBody {
    let body = Empty::new().map_err(|err| match err {});
    ResponseBody::new(body)
}

pub(crate) fn body_from_bytes(bytes: Bytes) -> ResponseBody {
    let body = Full::from(bytes).map_err(|err| match err {});
    ResponseBody::new(body)
}

fn not_found() -> Response<ResponseBody> {
    response_with_status(StatusCode::NOT_FOUND)
}

/// Hand the request to the next service, or end the chain with `404 Not Found`.
async fn call_next<F, B, FResBody>(
    fallback: Option<F>,
    req: Request<B>,
) -> Result<Response<ResponseBody>, ServeStaticError>
where
    F: Service<Request<B>, Response = Response<FResBody>>,
    F::Error: Into<BoxError>,
    FResBody: Body<Data = Bytes> + Send + 'static,
    FResBody::Error: Into<BoxError>,
{
    let Some(mut fallback) = fallback else {
        return Ok(not_found());
    };

    fallback
        .call(req)
        .map_err(|err| ServeStaticError::Next(err.into()))
        .map_ok(|response| {
            response.map(|body| {
                ResponseBody::new(body.map_err(|err| match err.into().downcast::<io::Error>() {
                    Ok(err) => *err,
                    Err(err) => io::Error::other(err),
                }))
            })
        })
        .await
}
