use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::aggregate::ErrorTally;
use crate::error::{Error, Phase, Result};
use crate::pair::IndexedPair;
use crate::pipeline::adapters::{FilterOp, ForEachOp, MapOp, Pool};
use crate::pipeline::barrier::{SortStage, TakeStage};
use crate::pipeline::cancel::{CancelReason, CancelToken};
use crate::pipeline::config::FlowControl;
use crate::pipeline::flow::{self, Delivery, Flow, Outlet};
use crate::pipeline::runtime::RunContext;
use crate::pipeline::stage::Stage;
use crate::source::PairSource;

struct StageSpec<K, V> {
    stage: Arc<dyn Stage<K, V>>,
    workers: Option<usize>,
}

impl<K, V> Clone for StageSpec<K, V> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
            workers: self.workers,
        }
    }
}

/// A chain of stages bound to a source.
///
/// Building a stream spawns nothing. Each terminal call
/// ([`pipe_into`](Stream::pipe_into), [`collect`](Stream::collect),
/// [`reduce`](Stream::reduce), [`first`](Stream::first)) wires a fresh set
/// of channels and tasks, so a stream can be run any number of times.
pub struct Stream<K, V> {
    source: Arc<dyn PairSource<K, V>>,
    control: FlowControl,
    stages: Vec<StageSpec<K, V>>,
}

impl<K, V> Stream<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    pub fn new<S>(source: S) -> Self
    where
        S: PairSource<K, V>,
    {
        Self {
            source: Arc::new(source),
            control: FlowControl::new(),
            stages: Vec::new(),
        }
    }

    /// Default worker count for pooled stages without an override.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.control = self.control.concurrency(concurrency);
        self
    }

    pub fn buffer(mut self, buffer: usize) -> Self {
        self.control = self.control.buffer(buffer);
        self
    }

    /// Number of stage errors that aborts a run. Zero is ignored.
    pub fn error_threshold(mut self, threshold: usize) -> Self {
        self.control = self.control.error_threshold(threshold);
        self
    }

    pub fn with_control(mut self, control: FlowControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> FlowControl {
        self.control
    }

    /// Keeps pairs for which `pred` resolves to `true`.
    pub fn filter<F, Fut>(self, pred: F) -> Self
    where
        F: Fn(&IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        self.push(Arc::new(Pool::new(FilterOp(pred))))
    }

    /// Replaces each value. Returning [`Error::Skip`] drops the pair.
    pub fn map<F, Fut>(self, f: F) -> Self
    where
        F: Fn(&IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.push(Arc::new(Pool::new(MapOp(f))))
    }

    /// Runs a side effect for each pair and passes it on unchanged.
    pub fn for_each<F, Fut>(self, f: F) -> Self
    where
        F: Fn(&IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.push(Arc::new(Pool::new(ForEachOp(f))))
    }

    /// Lets at most `n` pairs through, by arrival, then stops upstream.
    pub fn take(self, n: usize) -> Self {
        self.push(Arc::new(TakeStage::new(n)))
    }

    /// Collects everything upstream and re-emits it sorted by `compare`.
    ///
    /// Downstream pooled stages may reorder the sorted output again; keep
    /// them at one worker, or sort last.
    pub fn sort_by<F>(self, compare: F) -> Self
    where
        F: Fn(&IndexedPair<K, V>, &IndexedPair<K, V>) -> Ordering + Send + Sync + 'static,
    {
        self.push(Arc::new(SortStage::new(compare)))
    }

    /// Restores the order the source emitted pairs in.
    pub fn in_source_order(self) -> Self {
        self.sort_by(|a, b| a.position.cmp(&b.position))
    }

    /// Overrides the worker count of the stage added last.
    ///
    /// `take` and `sort_by` always run on one worker and ignore this.
    pub fn workers(mut self, workers: usize) -> Self {
        if let Some(last) = self.stages.last_mut() {
            if last.stage.fixed_workers().is_some() {
                #[cfg(feature = "tracing")]
                tracing::event!(
                    tracing::Level::DEBUG,
                    event = "kvpipe.workers.ignored",
                    stage = last.stage.name(),
                    workers = workers,
                    "kvpipe.workers.ignored"
                );
            } else {
                last.workers = Some(workers);
            }
        }
        self
    }

    fn push(mut self, stage: Arc<dyn Stage<K, V>>) -> Self {
        self.stages.push(StageSpec {
            stage,
            workers: None,
        });
        self
    }

    /// Resolves worker counts, rejecting anything below one.
    fn plan(&self) -> Result<Vec<(Arc<dyn Stage<K, V>>, usize)>> {
        if self.control.workers() < 1 {
            return Err(Error::InvalidConcurrency {
                stage: "stream",
                got: self.control.workers(),
            });
        }

        self.stages
            .iter()
            .cloned()
            .map(|spec| {
                let workers = spec
                    .stage
                    .fixed_workers()
                    .or(spec.workers)
                    .unwrap_or(self.control.workers());
                if workers < 1 {
                    return Err(Error::InvalidConcurrency {
                        stage: spec.stage.name(),
                        got: workers,
                    });
                }
                Ok((spec.stage, workers))
            })
            .collect()
    }

    /// Wires source, stages and error channel for one run.
    pub(crate) fn start(&self, cancel: &CancelToken) -> Result<Running<K, V>> {
        let plan = self.plan()?;

        let run = cancel.child();
        let (ctx, errors) = RunContext::new(run.clone(), self.control.buffer_size());

        let (outlet, mut flow) = flow::channel(ctx.buffer);
        feed(self.source.clone(), outlet, ctx.clone());

        for (stage, workers) in plan {
            flow = stage.launch(flow, workers, &ctx);
        }

        Ok(Running::new(flow, errors, self.control.threshold(), cancel, run))
    }

    pub(crate) fn len_hint(&self) -> Option<usize> {
        self.source.len_hint()
    }
}

/// Stamps positions on the source's pairs and pushes them into the first flow.
pub(crate) fn feed<K, V>(source: Arc<dyn PairSource<K, V>>, outlet: Outlet<K, V>, ctx: RunContext)
where
    K: Send + 'static,
    V: Send + 'static,
{
    tokio::spawn(async move {
        let upstream = ctx.cancel.child();
        let mut pairs = source.pairs(upstream.clone());
        let mut position = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "kvpipe.cancelled", stage = "feed", where_ = "recv", "kvpipe.cancelled");
                    break;
                }
                _ = outlet.stopped() => break,
                next = pairs.recv() => next,
            };
            let Some((key, value)) = next else { break; };

            match outlet.send(IndexedPair::new(position, key, value), &ctx.cancel).await {
                Delivery::Sent => position += 1,
                Delivery::Stopped | Delivery::Cancelled => break,
            }
        }

        #[cfg(feature = "tracing")]
        tracing::event!(
            tracing::Level::DEBUG,
            event = "kvpipe.feed.done",
            fed = position,
            "kvpipe.feed.done"
        );

        upstream.cancel();
    });
}

/// Cancels the run token when a sink returns, however it returns.
pub(crate) struct RunGuard(pub(crate) CancelToken);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// The terminal end of a started run, as seen by a sink.
pub(crate) struct Running<K, V> {
    pub(crate) flow: Flow<K, V>,
    pub(crate) watch: RunWatch,
}

/// Error side of a run: the stage error channel, its tally and the tokens
/// that can end the run.
pub(crate) struct RunWatch {
    errors: mpsc::UnboundedReceiver<Error>,
    tally: ErrorTally,
    caller: CancelToken,
    guard: RunGuard,
}

impl<K, V> Running<K, V> {
    pub(crate) fn new(
        flow: Flow<K, V>,
        errors: mpsc::UnboundedReceiver<Error>,
        threshold: usize,
        caller: &CancelToken,
        run: CancelToken,
    ) -> Self {
        Self {
            flow,
            watch: RunWatch {
                errors,
                tally: ErrorTally::new(threshold),
                caller: caller.clone(),
                guard: RunGuard(run),
            },
        }
    }

    /// Next terminal pair, `Ok(None)` at the end of a clean run.
    ///
    /// Pending stage errors are looked at before data, and once more after
    /// the flow closes, so an error raised by the last item still counts.
    pub(crate) async fn next(&mut self) -> Result<Option<IndexedPair<K, V>>> {
        loop {
            tokio::select! {
                biased;
                _ = self.watch.caller.cancelled() => {
                    return Err(self.watch.interrupted());
                }
                Some(err) = self.watch.errors.recv() => {
                    self.watch.record(err)?;
                }
                next = self.flow.recv() => {
                    if next.is_none() {
                        self.watch.drain()?;
                    }
                    return Ok(next);
                }
            }
        }
    }
}

impl RunWatch {
    /// Token shared by every task of the run.
    pub(crate) fn run_token(&self) -> &CancelToken {
        &self.guard.0
    }

    pub(crate) fn caller(&self) -> &CancelToken {
        &self.caller
    }

    /// Next stage error reported by the run; `None` once every task is gone.
    pub(crate) async fn reported(&mut self) -> Option<Error> {
        self.errors.recv().await
    }

    /// Counts `err`; fails with the aggregate once the threshold is reached.
    pub(crate) fn record(&mut self, err: Error) -> Result<()> {
        if self.tally.record(err) {
            return Err(self.trip());
        }
        Ok(())
    }

    /// Counts errors that are already queued.
    pub(crate) fn drain(&mut self) -> Result<()> {
        while let Ok(err) = self.errors.try_recv() {
            self.record(err)?;
        }
        Ok(())
    }

    /// The caller's cancellation as a sink-phase error.
    pub(crate) fn interrupted(&self) -> Error {
        interrupted(&self.caller, Phase::Sink)
    }

    /// Aborts the run with every error reported so far, queued ones
    /// included, followed by `cause`.
    pub(crate) fn abort(&mut self, cause: Error) -> Error {
        while let Ok(err) = self.errors.try_recv() {
            self.tally.push(err);
        }
        self.tally.push(cause);
        self.trip()
    }

    /// Aborts the run and hands back everything recorded so far.
    fn trip(&mut self) -> Error {
        self.guard.0.cancel();
        std::mem::replace(&mut self.tally, ErrorTally::new(1)).into_error()
    }
}

pub(crate) fn interrupted(token: &CancelToken, phase: Phase) -> Error {
    Error::interrupted(token.reason().unwrap_or(CancelReason::Cancelled), phase)
}
