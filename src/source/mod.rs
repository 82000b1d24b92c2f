//! Collaborators at both ends of a pipeline.
//!
//! A [`PairSource`] hands out a lazy, cancellable sequence of key/value
//! pairs; a [`Destination`] receives the pairs a stream produces.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::pipeline::cancel::CancelToken;

pub mod items;

pub use items::Items;

/// Anything a stream or [`map_reduce`](crate::mapreduce::map_reduce) can read from.
///
/// `pairs` starts a producer that yields pairs in the source's own
/// iteration order. The producer must stop once `cancel` fires or the
/// returned receiver is dropped.
pub trait PairSource<K, V>: Send + Sync + 'static {
    fn pairs(&self, cancel: CancelToken) -> mpsc::Receiver<(K, V)>;

    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Where [`Stream::pipe_into`](crate::pipeline::stream::Stream::pipe_into) writes.
pub trait Destination<K, V> {
    fn set(&self, key: K, value: V);
}

impl<K, V> Destination<K, V> for Mutex<HashMap<K, V>>
where
    K: Eq + Hash,
{
    fn set(&self, key: K, value: V) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }
}

impl<K, V> Destination<K, V> for Mutex<Vec<(K, V)>> {
    fn set(&self, key: K, value: V) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key, value));
    }
}
