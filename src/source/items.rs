use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::pipeline::cancel::CancelToken;
use crate::source::PairSource;

/// An immutable list of pairs, shared by every run that reads it.
pub struct Items<K, V> {
    pairs: Arc<Vec<(K, V)>>,
}

impl<K, V> Items<K, V> {
    pub fn new(pairs: Vec<(K, V)>) -> Self {
        Self {
            pairs: Arc::new(pairs),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<V> Items<usize, V> {
    /// Values keyed by their index.
    pub fn from_vec(values: Vec<V>) -> Self {
        Self::new(values.into_iter().enumerate().collect())
    }
}

impl<K, V> Items<K, V> {
    /// Pairs in the map's (unspecified) iteration order.
    pub fn from_map<S>(map: HashMap<K, V, S>) -> Self {
        Self::new(map.into_iter().collect())
    }
}

impl<K, V> FromIterator<(K, V)> for Items<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<K, V> Clone for Items<K, V> {
    fn clone(&self) -> Self {
        Self {
            pairs: self.pairs.clone(),
        }
    }
}

impl<K, V> PairSource<K, V> for Items<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn pairs(&self, cancel: CancelToken) -> mpsc::Receiver<(K, V)> {
        let (tx, rx) = mpsc::channel(1);
        let pairs = self.pairs.clone();

        tokio::spawn(async move {
            for (key, value) in pairs.iter() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = tx.send((key.clone(), value.clone())) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.pairs.len())
    }
}
