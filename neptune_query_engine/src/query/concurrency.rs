// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The fan-out/fan-in machinery every query is built from.
//!
//! ## Overview
//!
//! A query walks pages of run identifiers, and for every page launches
//! further fetches: attribute definitions, then attribute values or series
//! points. Upstream pagination must keep flowing while downstream fetches are
//! in flight, and the assembler wants a single merged stream of whatever the
//! downstream stages produce, in completion order.
//!
//! Three combinators express that shape:
//!
//! * [`generate_concurrently`] launches one downstream unit of work per
//!   upstream item and merges the downstream outputs.
//! * [`fork_concurrently`] runs several downstream streams over the same
//!   input and merges their outputs.
//! * [`gather_results`] drains the merged stream on the caller's task,
//!   stopping at the first terminal error.
//!
//! The merge is cooperative: work is polled concurrently up to the worker
//! bound of the owning [`Executor`], and nothing holds the caller's thread
//! while results are pending. Dropping the merged stream cancels every
//! in-flight unit of work, which is how a terminal error in one branch
//! cancels its siblings; the executors themselves are plain values released
//! on every exit path.

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};

use crate::Result;

/// A bounded worker pool for one stage of a query.
///
/// Every query owns two: one for general orchestration and one dedicated to
/// attribute-definition fetches, so definition lookups cannot be starved by
/// value fetches. The bound applies to each fan-out point drawing on the
/// executor.
#[derive(Clone, Copy, Debug)]
pub struct Executor {
    worker_limit: usize,
}

impl Executor {
    pub fn new(worker_limit: usize) -> Self {
        Self {
            worker_limit: worker_limit.max(1),
        }
    }

    pub fn worker_limit(&self) -> usize {
        self.worker_limit
    }
}

/// The stream type flowing between pipeline stages.
pub type ResultStream<'a, T> = BoxStream<'a, Result<T>>;

/// Launches `downstream(item)` for every item of `items` and yields the
/// merged downstream results in completion order.
///
/// An error on the upstream stream is forwarded into the merged stream; the
/// consumer decides whether it is terminal (it always is; see
/// [`gather_results`]).
pub fn generate_concurrently<'a, U, T, F>(
    items: ResultStream<'a, U>,
    executor: &Executor,
    mut downstream: F,
) -> ResultStream<'a, T>
where
    U: Send + 'a,
    T: Send + 'a,
    F: FnMut(U) -> ResultStream<'a, T> + Send + 'a,
{
    let limit = executor.worker_limit();
    items
        .map(move |item| match item {
            Ok(item) => downstream(item),
            Err(error) => stream::once(future::ready(Err(error))).boxed(),
        })
        .flatten_unordered(limit)
        .boxed()
}

/// Runs the given downstream streams concurrently, merging their outputs
/// into one stream in completion order.
pub fn fork_concurrently<'a, T>(
    executor: &Executor,
    downstreams: Vec<ResultStream<'a, T>>,
) -> ResultStream<'a, T>
where
    T: Send + 'a,
{
    stream::iter(downstreams)
        .flatten_unordered(executor.worker_limit())
        .boxed()
}

/// A downstream that yields a single, already-computed value.
pub fn return_value<'a, T>(value: T) -> ResultStream<'a, T>
where
    T: Send + 'a,
{
    stream::once(future::ready(Ok(value))).boxed()
}

/// Wraps a future into a single-element downstream stream.
pub fn once<'a, T, Fut>(future: Fut) -> ResultStream<'a, T>
where
    T: Send + 'a,
    Fut: std::future::Future<Output = Result<T>> + Send + 'a,
{
    stream::once(future).boxed()
}

/// Drains the merged stream, handing every record to `on_result`.
///
/// The first error, whether produced by a worker or by the callback, wins:
/// the stream is dropped, which cancels all in-flight work, and the error is
/// returned to the caller.
pub async fn gather_results<T, F>(mut results: ResultStream<'_, T>, mut on_result: F) -> Result<()>
where
    F: FnMut(T) -> Result<()>,
{
    while let Some(result) = results.next().await {
        on_result(result?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::time::Duration;

    fn sleepy_stream(values: Vec<(u64, u32)>) -> ResultStream<'static, u32> {
        stream::iter(values)
            .then(|(delay_ms, value)| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(value)
            })
            .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn merges_in_completion_order() {
        let executor = Executor::new(4);
        let items = stream::iter(vec![Ok(30u64), Ok(10), Ok(20)]).boxed();
        let merged = generate_concurrently(items, &executor, |delay| {
            sleepy_stream(vec![(delay, delay as u32)])
        });

        let mut seen = Vec::new();
        gather_results(merged, |value| {
            seen.push(value);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(seen, vec![10, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_error_stops_the_gather() {
        let executor = Executor::new(2);
        let items = stream::iter(vec![Ok(1u32), Ok(2), Ok(3)]).boxed();
        let merged = generate_concurrently(items, &executor, |value| {
            if value == 2 {
                stream::once(future::ready(Err(
                    ErrorKind::InternalError.with_message("boom")
                )))
                .boxed()
            } else {
                sleepy_stream(vec![(1_000, value)])
            }
        });

        let error = gather_results(merged, |_| Ok(())).await.unwrap_err();
        assert_eq!(error.to_string(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn fork_merges_each_downstream() {
        let executor = Executor::new(4);
        let merged = fork_concurrently(
            &executor,
            vec![
                sleepy_stream(vec![(20, 1), (0, 2)]),
                return_value(99),
                sleepy_stream(vec![(5, 3)]),
            ],
        );
        let mut seen = Vec::new();
        gather_results(merged, |value| {
            seen.push(value);
            Ok(())
        })
        .await
        .unwrap();

        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 99]);
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_error_propagates() {
        let executor = Executor::new(2);
        let items = stream::iter(vec![
            Ok(1u32),
            Err(ErrorKind::InternalError.with_message("upstream died")),
        ])
        .boxed();
        let merged = generate_concurrently(items, &executor, |value| return_value(value));
        let error = gather_results(merged, |_| Ok(())).await.unwrap_err();
        assert_eq!(error.to_string(), "upstream died");
    }

    #[tokio::test(start_paused = true)]
    async fn nested_generate_flattens() {
        let executor = Executor::new(3);
        let items = stream::iter(vec![Ok(0u32), Ok(10), Ok(20)]).boxed();
        let merged = generate_concurrently(items, &executor, |base| {
            let inner = stream::iter(vec![Ok(base), Ok(base + 1)]).boxed();
            generate_concurrently(inner, &Executor::new(2), |value| return_value(value * 2))
        });

        let mut seen = Vec::new();
        gather_results(merged, |value| {
            seen.push(value);
            Ok(())
        })
        .await
        .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 2, 20, 22, 40, 42]);
    }
}
