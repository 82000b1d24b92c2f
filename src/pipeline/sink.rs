//! Terminal operations of a [`Stream`].
//!
//! Every sink starts a fresh run, drains the terminal flow and watches the
//! run's error channel while doing so. Items reach the sinks in arrival
//! order; add [`Stream::in_source_order`] before a sink that needs the
//! source order back.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::collections::OrderedMap;
use crate::error::{Error, Phase, Result};
use crate::pair::IndexedPair;
use crate::pipeline::adapters::recv_shared;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::flow::Flow;
use crate::pipeline::runtime::{sink_scope, spawn_worker};
use crate::pipeline::stream::{interrupted, Running, Stream};
use crate::source::Destination;

/// Upper bound on what `collect` reserves up front from a source's length hint.
const PREALLOC_LIMIT: usize = 4096;

impl<K, V> Stream<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    /// Writes every terminal pair into `dst` and returns how many were written.
    ///
    /// On cancellation the writes already applied stay in `dst`.
    pub async fn pipe_into<D>(&self, cancel: &CancelToken, dst: &D) -> Result<usize>
    where
        D: Destination<K, V> + ?Sized,
    {
        sink_scope("pipe_into", async {
            let mut running = self.start(cancel)?;
            let mut written = 0usize;
            while let Some(pair) = running.next().await? {
                let (key, value) = pair.into_parts();
                dst.set(key, value);
                written += 1;
            }
            Ok(written)
        })
        .await
    }

    /// Gathers the terminal pairs in the order they arrived.
    pub async fn collect(&self, cancel: &CancelToken) -> Result<Vec<IndexedPair<K, V>>> {
        sink_scope("collect", async {
            let mut running = self.start(cancel)?;
            let mut out = Vec::with_capacity(self.len_hint().unwrap_or(0).min(PREALLOC_LIMIT));
            while let Some(pair) = running.next().await? {
                out.push(pair);
            }
            Ok(out)
        })
        .await
    }

    /// Gathers the terminal pairs into a new [`OrderedMap`] laid out in
    /// source order, whatever order they arrived in.
    ///
    /// A key produced more than once keeps the place of its earliest
    /// position and the value of its latest.
    pub async fn collect_map(&self, cancel: &CancelToken) -> Result<OrderedMap<K, V>>
    where
        K: Eq + Hash + Clone,
    {
        let mut pairs = self.collect(cancel).await?;
        pairs.sort_by_key(|pair| pair.position);
        Ok(pairs.into_iter().map(IndexedPair::into_parts).collect())
    }

    /// Folds the terminal pairs on the calling task.
    ///
    /// A cancelled fold returns the cancellation and drops the accumulator.
    pub async fn reduce<R, F>(&self, cancel: &CancelToken, init: R, mut fold: F) -> Result<R>
    where
        F: FnMut(R, IndexedPair<K, V>) -> R,
    {
        sink_scope("reduce", async {
            let mut running = self.start(cancel)?;
            let mut acc = init;
            while let Some(pair) = running.next().await? {
                acc = fold(acc, pair);
            }
            Ok(acc)
        })
        .await
    }

    /// Returns some pair `matcher` accepts, tested concurrently by the
    /// stream's base number of workers.
    ///
    /// Which of several matching pairs wins is up to scheduling. When no
    /// pair matches the result is [`Error::NotFound`]. A found match takes
    /// priority over pending errors, and both over the caller's
    /// cancellation. Matcher errors count toward the error threshold like
    /// stage errors.
    pub async fn first<F, Fut>(&self, cancel: &CancelToken, matcher: F) -> Result<IndexedPair<K, V>>
    where
        F: Fn(&IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        sink_scope("first", async {
            let Running { flow, mut watch } = self.start(cancel)?;

            let local = watch.run_token().child();
            let input = Arc::new(Mutex::new(flow));
            let matcher = Arc::new(matcher);
            let (found_tx, mut found) = mpsc::channel(1);
            let (failed_tx, mut failed) = mpsc::unbounded_channel();

            let mut set = JoinSet::new();
            for worker in 0..self.control().workers() {
                spawn_worker(
                    &mut set,
                    "first",
                    worker,
                    match_worker(
                        matcher.clone(),
                        input.clone(),
                        local.clone(),
                        found_tx.clone(),
                        failed_tx.clone(),
                    ),
                );
            }
            drop(found_tx);
            drop(input);

            let joined = async {
                while let Some(joined) = set.join_next().await {
                    if let Err(err) = joined {
                        let _ = failed_tx.send(Error::stage("first", Error::Join(err)));
                    }
                }
            };
            tokio::pin!(joined);
            let caller = watch.caller().clone();

            loop {
                tokio::select! {
                    biased;
                    Some(pair) = found.recv() => return Ok(winner(pair, &local)),
                    Some(err) = failed.recv() => watch.record(err)?,
                    Some(err) = watch.reported() => watch.record(err)?,
                    _ = caller.cancelled() => {
                        local.cancel();
                        return Err(watch.interrupted());
                    }
                    _ = &mut joined => break,
                }
            }

            // Every matcher has exited; settle what they left behind.
            if let Ok(pair) = found.try_recv() {
                return Ok(winner(pair, &local));
            }
            while let Ok(err) = failed.try_recv() {
                watch.record(err)?;
            }
            watch.drain()?;

            local.cancel();
            Err(Error::NotFound {
                source: Box::new(interrupted(&local, Phase::Sink)),
            })
        })
        .await
    }
}

fn winner<K, V>(pair: IndexedPair<K, V>, local: &CancelToken) -> IndexedPair<K, V> {
    local.cancel();

    #[cfg(feature = "tracing")]
    tracing::event!(
        tracing::Level::DEBUG,
        event = "kvpipe.first.found",
        position = pair.position,
        "kvpipe.first.found"
    );

    pair
}

async fn match_worker<K, V, F, Fut>(
    matcher: Arc<F>,
    input: Arc<Mutex<Flow<K, V>>>,
    local: CancelToken,
    found: mpsc::Sender<IndexedPair<K, V>>,
    failed: mpsc::UnboundedSender<Error>,
) where
    F: Fn(&IndexedPair<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = local.cancelled() => break,
            next = recv_shared(&input) => next,
        };
        let Some(pair) = next else { break; };

        let test = matcher(&pair);
        let matched = tokio::select! {
            biased;
            _ = local.cancelled() => break,
            matched = test => matched,
        };

        match matched {
            Ok(true) => {
                // Capacity one: only the first winner gets through.
                if found.try_send(pair).is_ok() {
                    local.cancel();
                }
                break;
            }
            Ok(false) => {}
            Err(err) if err.is_skip() => {}
            Err(err) => {
                let _ = failed.send(Error::stage("first", err));
            }
        }
    }
}
