use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::pair::IndexedPair;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::flow::{self, Delivery, Flow, Outlet};
use crate::pipeline::runtime::{spawn_worker, supervise, RunContext};
use crate::pipeline::stage::{PairOperator, Stage};

/// filter: keeps pairs the predicate accepts
pub(crate) struct FilterOp<F>(pub F);

#[async_trait]
impl<K, V, F, Fut> PairOperator<K, V> for FilterOp<F>
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(&IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    fn name(&self) -> &'static str {
        "filter"
    }

    async fn apply(&self, pair: IndexedPair<K, V>) -> Result<Option<IndexedPair<K, V>>> {
        let test = (self.0)(&pair);
        let keep = test.await?;
        Ok(keep.then_some(pair))
    }
}

/// map: V -> V, key and position untouched
pub(crate) struct MapOp<F>(pub F);

#[async_trait]
impl<K, V, F, Fut> PairOperator<K, V> for MapOp<F>
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(&IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    fn name(&self) -> &'static str {
        "map"
    }

    async fn apply(&self, pair: IndexedPair<K, V>) -> Result<Option<IndexedPair<K, V>>> {
        let map = (self.0)(&pair);
        let value = map.await?;
        Ok(Some(pair.with_value(value)))
    }
}

/// for_each: side effect, pair passes through unchanged
pub(crate) struct ForEachOp<F>(pub F);

#[async_trait]
impl<K, V, F, Fut> PairOperator<K, V> for ForEachOp<F>
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(&IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> &'static str {
        "for_each"
    }

    async fn apply(&self, pair: IndexedPair<K, V>) -> Result<Option<IndexedPair<K, V>>> {
        let effect = (self.0)(&pair);
        effect.await?;
        Ok(Some(pair))
    }
}

/// Runs a [`PairOperator`] on a pool of workers sharing one input flow.
pub(crate) struct Pool<O>(Arc<O>);

impl<O> Pool<O> {
    pub(crate) fn new(op: O) -> Self {
        Self(Arc::new(op))
    }
}

impl<K, V, O> Stage<K, V> for Pool<O>
where
    K: Send + 'static,
    V: Send + 'static,
    O: PairOperator<K, V>,
{
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn launch(self: Arc<Self>, input: Flow<K, V>, workers: usize, ctx: &RunContext) -> Flow<K, V> {
        let (outlet, output) = flow::channel(ctx.buffer);
        let upstream = input.stop_token();
        let input = Arc::new(Mutex::new(input));

        let mut set = JoinSet::new();
        for worker in 0..workers {
            spawn_worker(
                &mut set,
                self.0.name(),
                worker,
                run_worker(
                    self.0.clone(),
                    input.clone(),
                    upstream.clone(),
                    outlet.clone(),
                    ctx.clone(),
                ),
            );
        }

        supervise(self.0.name(), set, outlet, ctx.clone());
        output
    }
}

pub(crate) async fn recv_shared<K, V>(input: &Mutex<Flow<K, V>>) -> Option<IndexedPair<K, V>> {
    input.lock().await.recv().await
}

async fn run_worker<K, V, O>(
    op: Arc<O>,
    input: Arc<Mutex<Flow<K, V>>>,
    upstream: CancelToken,
    outlet: Outlet<K, V>,
    ctx: RunContext,
) where
    K: Send + 'static,
    V: Send + 'static,
    O: PairOperator<K, V>,
{
    #[cfg(feature = "tracing")]
    let stage = op.name();

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "kvpipe.cancelled", stage = stage, where_ = "recv", "kvpipe.cancelled");
                upstream.cancel();
                break;
            }
            _ = outlet.stopped() => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "kvpipe.downstream.closed", stage = stage, "kvpipe.downstream.closed");
                upstream.cancel();
                break;
            }
            next = recv_shared(&input) => next,
        };
        let Some(pair) = next else { break; };
        #[cfg(feature = "tracing")]
        let position = pair.position;

        let applied = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "kvpipe.cancelled", stage = stage, where_ = "apply", "kvpipe.cancelled");
                upstream.cancel();
                break;
            }
            applied = op.apply(pair) => applied,
        };

        match applied {
            Ok(Some(pair)) => {
                if outlet.send(pair, &ctx.cancel).await != Delivery::Sent {
                    #[cfg(feature = "tracing")]
                    tracing::event!(tracing::Level::DEBUG, event = "kvpipe.downstream.closed", stage = stage, where_ = "send", "kvpipe.downstream.closed");
                    upstream.cancel();
                    break;
                }
            }
            Ok(None) => {}
            Err(err) if err.is_skip() => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::TRACE, event = "kvpipe.item.skipped", stage = stage, position = position, "kvpipe.item.skipped");
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::event!(tracing::Level::DEBUG, event = "kvpipe.item.failed", stage = stage, position = position, "kvpipe.item.failed");
                ctx.report(op.name(), err);
            }
        }
    }
}
