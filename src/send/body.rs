use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use http::HeaderMap;
use http_body::{Body, SizeHint};
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, Take};
use tokio_util::io::ReaderStream;

/// Streams at most `len` bytes of a reader as a response body.
#[pin_project]
#[derive(Debug)]
pub(crate) struct FileBody<T> {
    #[pin]
    reader: ReaderStream<Take<T>>,
    remaining: u64,
}

impl<T> FileBody<T>
where
    T: AsyncRead,
{
    pub(crate) fn new(read: T, capacity: usize, len: u64) -> Self {
        Self {
            reader: ReaderStream::with_capacity(read.take(len), capacity),
            remaining: len,
        }
    }
}

impl<T> Body for FileBody<T>
where
    T: AsyncRead,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        let this = self.project();
        let poll = this.reader.poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            *this.remaining = this.remaining.saturating_sub(chunk.len() as u64);
        }

        poll
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limits_to_len() {
        let body = FileBody::new(&b"hello world"[..], 4, 5);
        assert_eq!(body.size_hint().exact(), Some(5));

        let bytes = hyper::body::to_bytes(body).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }
}
