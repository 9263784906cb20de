//! Source object byte streams

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use hyper::body::HttpBody;
use hyper::Body;

use ferry_util::error::{Error, Origin};

/// Byte stream of an object read from a gateway
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Wraps a response body so that at most one terminal item is yielded:
/// request-level and body-level failures are merged and the first
/// error ends the stream.
pub struct BodyStream {
	body: Body,
	origin: Origin,
	done: bool,
}

impl BodyStream {
	pub fn new(body: Body, origin: Origin) -> Self {
		Self {
			body,
			origin,
			done: false,
		}
	}

	pub fn boxed(body: Body, origin: Origin) -> ByteStream {
		Box::pin(Self::new(body, origin))
	}
}

impl Stream for BodyStream {
	type Item = Result<Bytes, Error>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		if self.done {
			return Poll::Ready(None);
		}
		let origin = self.origin;
		match futures::ready!(Pin::new(&mut self.body).poll_data(cx)) {
			Some(Ok(chunk)) => Poll::Ready(Some(Ok(chunk))),
			Some(Err(e)) => {
				self.done = true;
				Poll::Ready(Some(Err(Error::transient(origin, e))))
			}
			None => {
				self.done = true;
				Poll::Ready(None)
			}
		}
	}
}
