//! Parallel map with a single-threaded, threshold-guarded reduce.
//!
//! [`map_reduce`] reads any [`PairSource`], maps its pairs on a pool of
//! workers and folds the results on the calling task:
//!
//! - Mapper outputs keep the position of the input pair they came from.
//! - [`Error::Skip`] from either callback drops the item.
//! - Other callback errors are recorded. Once `error_threshold` of them are
//!   recorded the run aborts and the error is an [`Error::Aggregate`]
//!   listing them in the order they were seen. Fewer errors than that are
//!   dropped and the run succeeds.
//! - Plain cancellation aborts with [`Error::Cancelled`]; an expired
//!   deadline appends [`Error::DeadlineExceeded`] to the recorded errors.
//!
//! Every failure carries the accumulator as it stood when the run ended.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::pair::IndexedPair;
use crate::pipeline::adapters::recv_shared;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::config::FlowControl;
use crate::pipeline::flow::{self, Delivery, Flow, Outlet};
use crate::pipeline::runtime::{spawn_worker, supervise, RunContext};
use crate::pipeline::stream::{feed, Running};
use crate::source::PairSource;

/// A failed [`map_reduce`] run: the cause plus the partial accumulator.
pub struct MapReduceError<R> {
    pub partial: R,
    pub error: Error,
}

impl<R> MapReduceError<R> {
    pub fn into_parts(self) -> (R, Error) {
        (self.partial, self.error)
    }
}

impl<R> fmt::Debug for MapReduceError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapReduceError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<R> fmt::Display for MapReduceError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map-reduce aborted: {}", self.error)
    }
}

impl<R> std::error::Error for MapReduceError<R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<R> From<MapReduceError<R>> for Error {
    fn from(err: MapReduceError<R>) -> Self {
        err.error
    }
}

/// Maps every pair of `source` concurrently and folds the results into `init`.
pub async fn map_reduce<K, V, K2, V2, R, S, M, Fut, Red>(
    cancel: &CancelToken,
    source: S,
    mapper: M,
    reducer: Red,
    init: R,
    control: FlowControl,
) -> std::result::Result<R, MapReduceError<R>>
where
    K: Send + 'static,
    V: Send + 'static,
    K2: Send + 'static,
    V2: Send + 'static,
    S: PairSource<K, V>,
    M: Fn(IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IndexedPair<K2, V2>>> + Send + 'static,
    Red: FnMut(&mut R, IndexedPair<K2, V2>) -> Result<()>,
{
    #[cfg(feature = "tracing")]
    let span = tracing::debug_span!(
        "kvpipe.mapreduce",
        workers = control.workers(),
        threshold = control.threshold()
    );

    let fut = run(cancel, source, mapper, reducer, init, control);

    #[cfg(feature = "tracing")]
    let fut = tracing::Instrument::instrument(fut, span);

    fut.await
}

async fn run<K, V, K2, V2, R, S, M, Fut, Red>(
    cancel: &CancelToken,
    source: S,
    mapper: M,
    mut reducer: Red,
    init: R,
    control: FlowControl,
) -> std::result::Result<R, MapReduceError<R>>
where
    K: Send + 'static,
    V: Send + 'static,
    K2: Send + 'static,
    V2: Send + 'static,
    S: PairSource<K, V>,
    M: Fn(IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IndexedPair<K2, V2>>> + Send + 'static,
    Red: FnMut(&mut R, IndexedPair<K2, V2>) -> Result<()>,
{
    if control.workers() < 1 {
        return Err(MapReduceError {
            partial: init,
            error: Error::InvalidConcurrency {
                stage: "map",
                got: control.workers(),
            },
        });
    }

    let run = cancel.child();
    let (ctx, errors) = RunContext::new(run.clone(), control.buffer_size());

    let (outlet, input) = flow::channel(ctx.buffer);
    feed(Arc::new(source), outlet, ctx.clone());
    let mapped = launch_mappers(Arc::new(mapper), input, control.workers(), &ctx);

    let mut running = Running::new(mapped, errors, control.threshold(), cancel, run);
    let mut acc = init;

    loop {
        match running.next().await {
            Ok(Some(pair)) => match reducer(&mut acc, pair) {
                Ok(()) => {}
                Err(err) if err.is_skip() => {}
                Err(err) => {
                    if let Err(error) = running.watch.record(Error::stage("reduce", err)) {
                        return Err(MapReduceError {
                            partial: acc,
                            error,
                        });
                    }
                }
            },
            Ok(None) => return Ok(acc),
            Err(err @ Error::DeadlineExceeded { .. }) => {
                return Err(MapReduceError {
                    partial: acc,
                    error: running.watch.abort(err),
                });
            }
            Err(error) => {
                return Err(MapReduceError {
                    partial: acc,
                    error,
                })
            }
        }
    }
}

fn launch_mappers<K, V, K2, V2, M, Fut>(
    mapper: Arc<M>,
    input: Flow<K, V>,
    workers: usize,
    ctx: &RunContext,
) -> Flow<K2, V2>
where
    K: Send + 'static,
    V: Send + 'static,
    K2: Send + 'static,
    V2: Send + 'static,
    M: Fn(IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IndexedPair<K2, V2>>> + Send + 'static,
{
    let (outlet, output) = flow::channel(ctx.buffer);
    let upstream = input.stop_token();
    let input = Arc::new(Mutex::new(input));

    let mut set = JoinSet::new();
    for worker in 0..workers {
        spawn_worker(
            &mut set,
            "map",
            worker,
            map_worker(
                mapper.clone(),
                input.clone(),
                upstream.clone(),
                outlet.clone(),
                ctx.clone(),
            ),
        );
    }

    supervise("map", set, outlet, ctx.clone());
    output
}

async fn map_worker<K, V, K2, V2, M, Fut>(
    mapper: Arc<M>,
    input: Arc<Mutex<Flow<K, V>>>,
    upstream: CancelToken,
    outlet: Outlet<K2, V2>,
    ctx: RunContext,
) where
    M: Fn(IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IndexedPair<K2, V2>>> + Send + 'static,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = outlet.stopped() => break,
            next = recv_shared(&input) => next,
        };
        let Some(pair) = next else { break; };
        let position = pair.position;

        let mapped = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            mapped = mapper(pair) => mapped,
        };

        match mapped {
            Ok(mut out) => {
                out.position = position;
                if outlet.send(out, &ctx.cancel).await != Delivery::Sent {
                    break;
                }
            }
            Err(err) if err.is_skip() => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::TRACE, event = "kvpipe.item.skipped", stage = "map", position = position, "kvpipe.item.skipped");
            }
            Err(err) => ctx.report("map", err),
        }
    }

    upstream.cancel();
}
