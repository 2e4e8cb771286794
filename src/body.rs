//! Request and response bodies.
//!
//! A response is empty, a single buffer (xml, html) or the byte stream of
//! a file. `Body` implements both `Stream` and `http_body::Body`.

use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::Stream;
use http::header::HeaderMap;
use http_body::Body as HttpBody;
use pin_project::pin_project;

use crate::fs::{ByteStream, FileContent};

/// Response body produced by the handler.
pub struct Body {
    inner: Inner,
}

enum Inner {
    Once(Option<Bytes>),
    File(ByteStream),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Body {
        Body {
            inner: Inner::Once(None),
        }
    }

    /// Size of the body if it is known up front.
    pub fn len(&self) -> Option<u64> {
        match &self.inner {
            Inner::Once(b) => Some(b.as_ref().map_or(0, |b| b.len() as u64)),
            Inner::File(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl From<FileContent> for Body {
    fn from(content: FileContent) -> Body {
        let inner = match content {
            FileContent::Bytes(b) => Inner::Once(Some(b)),
            FileContent::Stream(s) => Inner::File(s),
        };
        Body { inner }
    }
}

macro_rules! body_from {
    ($($t:ty),*) => {$(
        impl From<$t> for Body {
            fn from(t: $t) -> Body {
                Body {
                    inner: Inner::Once(Some(Bytes::from(t))),
                }
            }
        }
    )*};
}

body_from!(Bytes, Vec<u8>, String, &'static str);

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match &mut self.inner {
            Inner::Once(bytes) => Poll::Ready(bytes.take().map(Ok)),
            Inner::File(stream) => match stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
                Poll::Ready(Some(Ok(b))) => Poll::Ready(Some(Ok(b))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<io::Result<Bytes>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<io::Result<Option<HeaderMap>>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, Inner::Once(None))
    }
}

// Adapts a request body that is only a `Stream` to `http_body::Body`.
#[pin_project]
pub(crate) struct StreamBody<S> {
    #[pin]
    stream: S,
}

impl<S> StreamBody<S> {
    pub fn new(stream: S) -> StreamBody<S> {
        StreamBody { stream }
    }
}

impl<S, D, E> HttpBody for StreamBody<S>
where
    S: Stream<Item = Result<D, E>>,
    D: Buf + Send,
    E: StdError + Send + Sync + 'static,
{
    type Data = D;
    type Error = E;

    fn poll_data(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<D, E>>> {
        self.project().stream.poll_next(cx)
    }

    fn poll_trailers(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<Option<HeaderMap>, E>> {
        Poll::Ready(Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::bytes_stream;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn file_content_body() {
        let mut body = Body::from(FileContent::Stream(bytes_stream(&b"abc"[..])));
        assert_eq!(body.len(), None);
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert!(body.next().await.is_none());

        let body = Body::from(FileContent::Bytes(Bytes::from_static(b"xy")));
        assert_eq!(body.len(), Some(2));
        assert!(Body::empty().is_empty());
    }
}
