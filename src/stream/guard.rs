//! Stream-level error boundary for one turn.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use tracing::error;

use crate::error::HandoffError;
use crate::protocol::chatkit::ThreadStreamEvent;

pin_project! {
    /// Forwards events until the first error, which is replaced by a single
    /// ChatKit `error` event before the stream ends.
    pub struct GuardedTurn<S> {
        #[pin]
        inner: S,
        finished: bool,
    }
}

impl<S> GuardedTurn<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            finished: false,
        }
    }
}

impl<S> Stream for GuardedTurn<S>
where
    S: Stream<Item = Result<ThreadStreamEvent, HandoffError>>,
{
    type Item = ThreadStreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(event)),
            Poll::Ready(Some(Err(err))) => {
                *this.finished = true;
                error!(error = %err, "turn failed, ending stream");
                Poll::Ready(Some(ThreadStreamEvent::Error(err.to_chatkit_error())))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
