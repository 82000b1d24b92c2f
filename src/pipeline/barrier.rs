use std::cmp::Ordering;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::pair::IndexedPair;
use crate::pipeline::flow::{self, Delivery, Flow, Outlet};
use crate::pipeline::runtime::{spawn_worker, supervise, RunContext};
use crate::pipeline::stage::Stage;

/// Forwards the first `limit` items by arrival, then stops upstream.
///
/// Runs on a single worker: a cutoff shared between racing workers would
/// not be deterministic.
pub(crate) struct TakeStage {
    limit: usize,
}

impl TakeStage {
    pub(crate) fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl<K, V> Stage<K, V> for TakeStage
where
    K: Send + 'static,
    V: Send + 'static,
{
    fn name(&self) -> &'static str {
        "take"
    }

    fn fixed_workers(&self) -> Option<usize> {
        Some(1)
    }

    fn launch(self: Arc<Self>, input: Flow<K, V>, _workers: usize, ctx: &RunContext) -> Flow<K, V> {
        let (outlet, output) = flow::channel(ctx.buffer);
        let mut set = JoinSet::new();
        spawn_worker(
            &mut set,
            "take",
            0,
            take(self.limit, input, outlet.clone(), ctx.clone()),
        );
        supervise("take", set, outlet, ctx.clone());
        output
    }
}

async fn take<K, V>(limit: usize, mut input: Flow<K, V>, outlet: Outlet<K, V>, ctx: RunContext)
where
    K: Send + 'static,
    V: Send + 'static,
{
    let mut taken = 0usize;
    while taken < limit {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = outlet.stopped() => break,
            next = input.recv() => next,
        };
        let Some(pair) = next else { break; };

        if outlet.send(pair, &ctx.cancel).await != Delivery::Sent {
            break;
        }
        taken += 1;
    }

    #[cfg(feature = "tracing")]
    tracing::event!(
        tracing::Level::DEBUG,
        event = "kvpipe.take.limit",
        limit = limit,
        taken = taken,
        "kvpipe.take.limit"
    );

    // Whatever is still in flight upstream is no longer wanted.
    input.stop();
}

type Compare<K, V> = dyn Fn(&IndexedPair<K, V>, &IndexedPair<K, V>) -> Ordering + Send + Sync;

/// Drains the whole upstream, sorts it, then replays it on one worker.
pub(crate) struct SortStage<K, V> {
    compare: Arc<Compare<K, V>>,
}

impl<K, V> SortStage<K, V> {
    pub(crate) fn new<F>(compare: F) -> Self
    where
        F: Fn(&IndexedPair<K, V>, &IndexedPair<K, V>) -> Ordering + Send + Sync + 'static,
    {
        Self {
            compare: Arc::new(compare),
        }
    }
}

impl<K, V> Stage<K, V> for SortStage<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    fn name(&self) -> &'static str {
        "sort_by"
    }

    fn fixed_workers(&self) -> Option<usize> {
        Some(1)
    }

    fn launch(self: Arc<Self>, input: Flow<K, V>, _workers: usize, ctx: &RunContext) -> Flow<K, V> {
        let (outlet, output) = flow::channel(ctx.buffer);
        let mut set = JoinSet::new();
        spawn_worker(
            &mut set,
            "sort_by",
            0,
            sort(self.compare.clone(), input, outlet.clone(), ctx.clone()),
        );
        supervise("sort_by", set, outlet, ctx.clone());
        output
    }
}

async fn sort<K, V>(
    compare: Arc<Compare<K, V>>,
    mut input: Flow<K, V>,
    outlet: Outlet<K, V>,
    ctx: RunContext,
) where
    K: Send + 'static,
    V: Send + 'static,
{
    let mut buffered = Vec::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            _ = outlet.stopped() => return,
            next = input.recv() => next,
        };
        match next {
            Some(pair) => buffered.push(pair),
            None => break,
        }
    }

    buffered.sort_by(|a, b| compare(a, b));

    #[cfg(feature = "tracing")]
    tracing::event!(
        tracing::Level::DEBUG,
        event = "kvpipe.sort.sorted",
        items = buffered.len(),
        "kvpipe.sort.sorted"
    );

    for pair in buffered {
        if outlet.send(pair, &ctx.cancel).await != Delivery::Sent {
            return;
        }
    }
}
