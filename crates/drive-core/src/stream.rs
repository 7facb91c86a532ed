//! Stream combinators for the iteration and diagnostic pipelines
//!
//! [`concurrent_map`] is the bounded fan-out used to pipeline decryption:
//! at most `concurrency` mappers run at once and outputs are yielded in
//! completion order. [`zip_streams`] multiplexes two live streams by racing
//! their next items, with a mode that ends the combined stream as soon as
//! either side completes.

use futures::stream::{Stream, StreamExt};
use futures::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Map a stream through an async function with bounded concurrency.
///
/// At most `concurrency` invocations of `f` are in flight at once; results
/// are yielded in completion order, not input order. A `concurrency` of zero
/// is treated as one.
pub fn concurrent_map<S, F, Fut>(
    input: S,
    concurrency: usize,
    f: F,
) -> impl Stream<Item = Fut::Output>
where
    S: Stream,
    F: FnMut(S::Item) -> Fut,
    Fut: Future,
{
    input.map(f).buffer_unordered(concurrency.max(1))
}

/// Termination behavior of [`zip_streams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZipMode {
    /// When one side completes, keep draining the other.
    DrainBoth,
    /// End the combined stream as soon as either side completes.
    StopOnFirstDone,
}

/// An item from one side of a [`zip_streams`] pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZipItem<A, B> {
    /// Item from the first stream.
    Left(A),
    /// Item from the second stream.
    Right(B),
}

/// Stream returned by [`zip_streams`].
pub struct ZipStreams<SA, SB> {
    left: SA,
    right: SB,
    left_done: bool,
    right_done: bool,
    poll_left_first: bool,
    mode: ZipMode,
}

/// Multiplex two streams by racing their next items.
///
/// Whichever side has an item ready first is yielded. Polling alternates
/// between the sides so neither can starve the other.
pub fn zip_streams<SA, SB>(left: SA, right: SB, mode: ZipMode) -> ZipStreams<SA, SB>
where
    SA: Stream + Unpin,
    SB: Stream + Unpin,
{
    ZipStreams {
        left,
        right,
        left_done: false,
        right_done: false,
        poll_left_first: true,
        mode,
    }
}

impl<SA, SB> ZipStreams<SA, SB> {
    fn finished(&self) -> bool {
        match self.mode {
            ZipMode::DrainBoth => self.left_done && self.right_done,
            ZipMode::StopOnFirstDone => self.left_done || self.right_done,
        }
    }
}

impl<SA, SB> Stream for ZipStreams<SA, SB>
where
    SA: Stream + Unpin,
    SB: Stream + Unpin,
{
    type Item = ZipItem<SA::Item, SB::Item>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished() {
            return Poll::Ready(None);
        }

        let left_first = this.poll_left_first;
        this.poll_left_first = !left_first;

        for poll_left in [left_first, !left_first] {
            if poll_left && !this.left_done {
                match Pin::new(&mut this.left).poll_next(cx) {
                    Poll::Ready(Some(item)) => return Poll::Ready(Some(ZipItem::Left(item))),
                    Poll::Ready(None) => {
                        this.left_done = true;
                        if this.finished() {
                            return Poll::Ready(None);
                        }
                    }
                    Poll::Pending => {}
                }
            } else if !poll_left && !this.right_done {
                match Pin::new(&mut this.right).poll_next(cx) {
                    Poll::Ready(Some(item)) => return Poll::Ready(Some(ZipItem::Right(item))),
                    Poll::Ready(None) => {
                        this.right_done = true;
                        if this.finished() {
                            return Poll::Ready(None);
                        }
                    }
                    Poll::Pending => {}
                }
            }
        }

        if this.left_done && this.right_done {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_map_never_exceeds_the_cap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results: Vec<u32> = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            concurrent_map(stream::iter(0..20u32), 3, move |value| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    value
                }
            })
            .collect()
            .await
        };

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn concurrent_map_yields_in_completion_order() {
        let results: Vec<u64> = concurrent_map(stream::iter([30u64, 10, 20]), 3, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay
        })
        .collect()
        .await;

        assert_eq!(results, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn zip_drain_both_yields_the_multiset_union() {
        let left = stream::iter([1, 2, 3]);
        let right = stream::iter(["a", "b"]);
        let items: Vec<_> = zip_streams(left, right, ZipMode::DrainBoth).collect().await;

        let lefts: Vec<i32> = items
            .iter()
            .filter_map(|item| match item {
                ZipItem::Left(value) => Some(*value),
                ZipItem::Right(_) => None,
            })
            .collect();
        let rights: Vec<&str> = items
            .iter()
            .filter_map(|item| match item {
                ZipItem::Right(value) => Some(*value),
                ZipItem::Left(_) => None,
            })
            .collect();

        assert_eq!(lefts, vec![1, 2, 3]);
        assert_eq!(rights, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn zip_stop_on_first_done_ends_with_the_shorter_side() {
        let left = stream::iter([1, 2, 3, 4, 5]);
        let right = stream::iter(Vec::<&str>::new());
        let items: Vec<_> = zip_streams(left, right, ZipMode::StopOnFirstDone)
            .collect()
            .await;

        // The empty side completes on its first poll; at most one left item
        // can slip in before that.
        assert!(items.len() <= 1);
    }

    #[tokio::test]
    async fn zip_stop_on_first_done_ends_when_primary_finishes() {
        let primary = stream::iter([1, 2]);
        let signals = stream::pending::<&str>();
        let items: Vec<_> = zip_streams(primary, signals, ZipMode::StopOnFirstDone)
            .collect()
            .await;

        assert_eq!(
            items,
            vec![ZipItem::Left(1), ZipItem::Left(2)]
        );
    }
}
