#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kvpipe::collections::OrderedMap;
use kvpipe::pipeline::cancel::CancelToken;
use kvpipe::source::{Items, PairSource};
use tokio::sync::mpsc;

/// `0..n`, keyed by itself.
pub fn numbers(n: u64) -> Items<u64, u64> {
    (0..n).map(|i| (i, i)).collect()
}

/// Ordered map with keys `0..n` and their decimal strings as values.
pub fn decimal_map(n: u64) -> Arc<OrderedMap<u64, String>> {
    Arc::new((0..n).map(|i| (i, i.to_string())).collect())
}

/// A source that counts what it emitted and reports when its producer exits.
#[derive(Clone)]
pub struct TrackedSource {
    len: u64,
    delay: Option<Duration>,
    pub sent: Arc<AtomicUsize>,
    pub finished: Arc<AtomicBool>,
}

impl TrackedSource {
    pub fn new(len: u64) -> Self {
        Self {
            len,
            delay: None,
            sent: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl PairSource<u64, u64> for TrackedSource {
    fn pairs(&self, cancel: CancelToken) -> mpsc::Receiver<(u64, u64)> {
        let (tx, rx) = mpsc::channel(1);
        let this = self.clone();

        tokio::spawn(async move {
            for i in 0..this.len {
                if let Some(delay) = this.delay {
                    tokio::time::sleep(delay).await;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send((i, i)) => {
                        if sent.is_err() {
                            break;
                        }
                        this.sent.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            this.finished.store(true, Ordering::SeqCst);
        });

        rx
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.len as usize)
    }
}

/// Polls `cond` until it holds, panicking after `timeout`.
pub async fn eventually<F>(timeout: Duration, mut cond: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(timeout, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within {timeout:?}");
}

/// Sorted keys of a collected result.
pub fn sorted_keys<V>(pairs: &[kvpipe::pair::IndexedPair<u64, V>]) -> Vec<u64> {
    let mut keys: Vec<u64> = pairs.iter().map(|p| p.key).collect();
    keys.sort_unstable();
    keys
}
