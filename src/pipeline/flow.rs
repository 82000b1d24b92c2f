use tokio::sync::mpsc;

use crate::pair::IndexedPair;
use crate::pipeline::cancel::CancelToken;

/// Receiving end of the connection between two stages.
///
/// Only the producing stage closes the data channel, once all of its
/// workers have exited. The consumer talks back through the stop token:
/// calling [`Flow::stop`] or dropping the flow tells the producer that
/// nobody wants more items.
pub struct Flow<K, V> {
    data: mpsc::Receiver<IndexedPair<K, V>>,
    stop: CancelToken,
}

/// Producing end of a [`Flow`]. Cloned once per worker.
pub(crate) struct Outlet<K, V> {
    data: mpsc::Sender<IndexedPair<K, V>>,
    stop: CancelToken,
}

/// Result of handing one item to the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    Stopped,
    Cancelled,
}

pub(crate) fn channel<K, V>(buffer: usize) -> (Outlet<K, V>, Flow<K, V>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let stop = CancelToken::new();
    (
        Outlet {
            data: tx,
            stop: stop.clone(),
        },
        Flow { data: rx, stop },
    )
}

impl<K, V> Flow<K, V> {
    /// Next item, or `None` once the producer has closed the flow.
    pub async fn recv(&mut self) -> Option<IndexedPair<K, V>> {
        self.data.recv().await
    }

    /// Asks the producer to stop sending.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub(crate) fn stop_token(&self) -> CancelToken {
        self.stop.clone()
    }
}

impl<K, V> Drop for Flow<K, V> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl<K, V> Outlet<K, V> {
    /// Resolves once the consumer has stopped the flow.
    pub(crate) async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Sends `pair`, giving up when the run is cancelled or the consumer
    /// stops listening.
    pub(crate) async fn send(&self, pair: IndexedPair<K, V>, cancel: &CancelToken) -> Delivery {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Delivery::Cancelled,
            _ = self.stop.cancelled() => Delivery::Stopped,
            res = self.data.send(pair) => match res {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Stopped,
            },
        }
    }
}

impl<K, V> Clone for Outlet<K, V> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            stop: self.stop.clone(),
        }
    }
}
