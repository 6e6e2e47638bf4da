use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{HeaderMap, Method, Response, StatusCode, Uri};
use http_body::{Body, SizeHint};
use pin_project::{pin_project, pinned_drop};

use crate::serve_static::ResponseBody;

/// The parts of the request still known once its response is done.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Callback fired once a response served from the filesystem has been fully sent, or its
/// body dropped early. It never fires for requests that ended in an error.
#[derive(Clone)]
pub struct OnComplete(Arc<dyn Fn(&RequestHead, &ResponseHead, &Path) + Send + Sync>);

impl OnComplete {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&RequestHead, &ResponseHead, &Path) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }
}

impl fmt::Debug for OnComplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OnComplete").finish_non_exhaustive()
    }
}

struct Pending {
    callback: OnComplete,
    request: RequestHead,
    response: ResponseHead,
    path: PathBuf,
}

impl Pending {
    fn fire(self) {
        (self.callback.0)(&self.request, &self.response, &self.path);
    }
}

/// Wrap `res` so `callback` runs once when its body finishes.
pub(crate) fn notify_on_finish(
    res: Response<ResponseBody>,
    callback: OnComplete,
    request: RequestHead,
    path: PathBuf,
) -> Response<ResponseBody> {
    let response = ResponseHead {
        status: res.status(),
        headers: res.headers().clone(),
    };

    res.map(|body| {
        ResponseBody::new(NotifyOnFinish {
            inner: body,
            pending: Some(Pending {
                callback,
                request,
                response,
                path,
            }),
        })
    })
}

/// Body that holds the completion callback until it ends or is dropped.
///
/// `pending` is taken exactly once: on the end of the stream, on a read error (which
/// discards it), or on drop.
#[pin_project(PinnedDrop)]
struct NotifyOnFinish<B> {
    #[pin]
    inner: B,
    pending: Option<Pending>,
}

impl<B> Body for NotifyOnFinish<B>
where
    B: Body<Data = Bytes, Error = io::Error>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let this = self.project();
        let poll = this.inner.poll_data(cx);

        match &poll {
            Poll::Ready(None) => {
                if let Some(pending) = this.pending.take() {
                    pending.fire();
                }
            }
            Poll::Ready(Some(Err(err))) => {
                tracing::debug!(error = %err, "response body failed");
                this.pending.take();
            }
            _ => {}
        }

        poll
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        self.project().inner.poll_trailers(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[pinned_drop]
impl<B> PinnedDrop for NotifyOnFinish<B> {
    fn drop(self: Pin<&mut Self>) {
        // client went away or the body was never polled to the end
        if let Some(pending) = self.project().pending.take() {
            pending.fire();
        }
    }
}
