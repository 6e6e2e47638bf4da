//! Static file serving as a [`tower_service::Service`], with fallthrough to a next service,
//! directory redirects and a completion callback.
//!
//! For every `GET` or `HEAD` request the path is resolved inside the root directory:
//!
//! - a file is streamed, honoring conditional and range requests
//! - a directory requested without a trailing slash is redirected to `path/` (or treated as
//!   not found when `redirect` is off)
//! - anything else that fails with a client error is passed to the fallback service when
//!   `fallthrough` is on, and returned as a [`ServeStaticError`] otherwise
//!
//! # Example
//! ```
//! use std::convert::Infallible;
//!
//! use serve_static::{ServeStatic, ServeStaticError};
//! use tower::ServiceExt;
//!
//! // This will serve files in the "assets" directory and
//! // its subdirectories
//! let service = ServeStatic::new("assets").on_complete(|req, _res, path| {
//!     println!("{} served {}", req.uri, path.display());
//! });
//!
//! // Errors that didn't fall through end the chain as empty responses
//! let service = tower::service_fn(move |req: hyper::Request<hyper::Body>| {
//!     let service = service.clone();
//!     async move {
//!         let res = service.oneshot(req).await;
//!         Ok::<_, Infallible>(res.unwrap_or_else(ServeStaticError::into_response))
//!     }
//! });
//!
//! # async {
//! // Run our service using `hyper`
//! let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 3000));
//! hyper::Server::bind(&addr)
//!     .serve(tower::make::Shared::new(service))
//!     .await
//!     .expect("server error");
//! # };
//! ```

pub use completion::{OnComplete, RequestHead, ResponseHead};
pub use error::{SendError, ServeStaticError};
pub use options::{Config, Dotfiles, Extensions, Index, MaxAge, ServeStaticOptions, SetHeaders};
pub use serve_static::{DefaultServeStaticFallback, OriginalUri, ResponseBody, ServeStatic};

mod completion;
mod directory;
mod error;
mod options;
mod send;
mod serve_static;
mod state;
