//! Stream throttling utilities

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Throttle the stream to emit at most once per interval
    ///
    /// Uses "latest-wins" semantics - if multiple items arrive
    /// during an interval, only the latest is emitted.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// A stream combinator that throttles emission rate
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        finished: bool,
    }
}

impl<S: Stream> Throttle<S> {
    /// Create a new throttled stream
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Don't burst after a quiet period
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { stream, interval, pending: None, finished: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Drain everything available, keeping only the latest
        while !*this.finished {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.finished = true,
                Poll::Pending => break,
            }
        }

        if this.pending.is_none() {
            return if *this.finished { Poll::Ready(None) } else { Poll::Pending };
        }

        match this.interval.poll_tick(cx) {
            Poll::Ready(_) => Poll::Ready(this.pending.take()),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    #[tokio::test(start_paused = true)]
    async fn keeps_latest_item_per_interval() {
        let (tx, rx) = mpsc::channel(16);
        let mut stream = ReceiverStream::new(rx).throttle(Duration::from_millis(100));

        tx.send(1).await.unwrap();
        assert_eq!(stream.next().await, Some(1));

        for i in 2..=5 {
            tx.send(i).await.unwrap();
        }
        assert_eq!(stream.next().await, Some(5));

        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_source_does_not_end_stream() {
        let (tx, rx) = mpsc::channel(16);
        let mut stream = ReceiverStream::new(rx).throttle(Duration::from_millis(10));

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(7).await.unwrap();
        });

        assert_eq!(stream.next().await, Some(7));
        sender.await.unwrap();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn final_item_is_flushed_at_end() {
        let mut stream = futures::stream::iter(vec![1, 2, 3]).throttle(Duration::from_millis(100));
        assert_eq!(stream.next().await, Some(3));
        assert_eq!(stream.next().await, None);
    }
}
