use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;

use crate::pipeline::cancel::CancelToken;
use crate::pipeline::stream::Stream;
use crate::source::{Destination, PairSource};

/// Slot handle into the node arena.
type Slot = usize;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<Slot>,
    next: Option<Slot>,
}

/// Doubly linked list over an arena plus a hash index of slot handles.
///
/// Nodes own the keys and values; the index only remembers where each key
/// lives, so removal is O(1) without back-pointers.
struct Chain<K, V> {
    index: HashMap<K, Slot>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<Slot>,
    head: Option<Slot>,
    tail: Option<Slot>,
}

impl<K, V> Chain<K, V>
where
    K: Eq + Hash + Clone,
{
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn node(&self, slot: Slot) -> &Node<K, V> {
        self.nodes[slot]
            .as_ref()
            .unwrap_or_else(|| unreachable!("slot {slot} is linked but empty"))
    }

    fn node_mut(&mut self, slot: Slot) -> &mut Node<K, V> {
        self.nodes[slot]
            .as_mut()
            .unwrap_or_else(|| unreachable!("slot {slot} is linked but empty"))
    }

    fn push_tail(&mut self, key: K, value: V) {
        let node = Node {
            key: key.clone(),
            value,
            prev: self.tail,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(key, slot);
    }

    fn unlink(&mut self, slot: Slot) -> Node<K, V> {
        let node = self.nodes[slot]
            .take()
            .unwrap_or_else(|| unreachable!("slot {slot} is linked but empty"));

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.free.push(slot);
        node
    }

    fn iter(&self) -> ChainIter<'_, K, V> {
        ChainIter {
            chain: self,
            cursor: self.head,
        }
    }

    /// Relinks the nodes in `order` without moving them in the arena.
    fn relink(&mut self, order: &[Slot]) {
        self.head = order.first().copied();
        self.tail = order.last().copied();
        for (i, &slot) in order.iter().enumerate() {
            let prev = i.checked_sub(1).map(|p| order[p]);
            let next = order.get(i + 1).copied();
            let node = self.node_mut(slot);
            node.prev = prev;
            node.next = next;
        }
    }
}

struct ChainIter<'a, K, V> {
    chain: &'a Chain<K, V>,
    cursor: Option<Slot>,
}

impl<'a, K, V> Iterator for ChainIter<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    type Item = (Slot, &'a Node<K, V>);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let node = self.chain.node(slot);
        self.cursor = node.next;
        Some((slot, node))
    }
}

/// Insertion-ordered map behind a single read/write lock.
///
/// Structural changes take the write lock; traversals, including the one a
/// running stream performs, hold the read lock for their whole walk. A map
/// therefore must not be the destination of a stream it is feeding.
pub struct OrderedMap<K, V> {
    chain: RwLock<Chain<K, V>>,
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chain: RwLock::new(Chain::with_capacity(capacity)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Chain<K, V>> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Chain<K, V>> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces. Returns `true` if the key was new; a replaced
    /// value keeps its original place in the order.
    pub fn put(&self, key: K, value: V) -> bool {
        let mut chain = self.write();
        if let Some(&slot) = chain.index.get(&key) {
            chain.node_mut(slot).value = value;
            return false;
        }
        chain.push_tail(key, value);
        true
    }

    /// Inserts only if the key is absent.
    pub fn put_nx(&self, key: K, value: V) -> bool {
        let mut chain = self.write();
        if chain.index.contains_key(&key) {
            return false;
        }
        chain.push_tail(key, value);
        true
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let chain = self.read();
        let slot = *chain.index.get(key)?;
        Some(chain.node(slot).value.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.read().index.contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut chain = self.write();
        let slot = chain.index.remove(key)?;
        Some(chain.unlink(slot).value)
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every entry in order with its position.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V, usize),
    {
        let chain = self.read();
        for (order, (_, node)) in chain.iter().enumerate() {
            f(&node.key, &node.value, order);
        }
    }

    /// Like [`for_each`](Self::for_each), but stops as soon as `f` returns `false`.
    pub fn for_each_until<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V, usize) -> bool,
    {
        let chain = self.read();
        for (order, (_, node)) in chain.iter().enumerate() {
            if !f(&node.key, &node.value, order) {
                break;
            }
        }
    }

    /// New map holding the entries `keep` accepts, in the same order.
    pub fn filter<F>(&self, mut keep: F) -> Self
    where
        V: Clone,
        F: FnMut(&K, &V, usize) -> bool,
    {
        let chain = self.read();
        let mut out = Chain::with_capacity(0);
        for (order, (_, node)) in chain.iter().enumerate() {
            if keep(&node.key, &node.value, order) {
                out.push_tail(node.key.clone(), node.value.clone());
            }
        }
        Self {
            chain: RwLock::new(out),
        }
    }

    /// New map with the same keys and order and every value replaced by `f`.
    pub fn map_values<U, F>(&self, mut f: F) -> OrderedMap<K, U>
    where
        F: FnMut(&K, &V, usize) -> U,
    {
        let chain = self.read();
        let mut out = Chain::with_capacity(chain.index.len());
        for (order, (_, node)) in chain.iter().enumerate() {
            let value = f(&node.key, &node.value, order);
            out.push_tail(node.key.clone(), value);
        }
        OrderedMap {
            chain: RwLock::new(out),
        }
    }

    /// Snapshot of all entries in order.
    pub fn to_pairs(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        let chain = self.read();
        chain
            .iter()
            .map(|(_, node)| (node.key.clone(), node.value.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<K> {
        let chain = self.read();
        chain.iter().map(|(_, node)| node.key.clone()).collect()
    }

    /// Reorders the entries in place; equal entries keep their relative order.
    pub fn sort_by<F>(&self, mut compare: F)
    where
        F: FnMut((&K, &V), (&K, &V)) -> Ordering,
    {
        let mut chain = self.write();
        let mut order: Vec<Slot> = chain.iter().map(|(slot, _)| slot).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (chain.node(a), chain.node(b));
            compare((&a.key, &a.value), (&b.key, &b.value))
        });
        chain.relink(&order);
    }

    /// Sorted copy; `self` keeps its order.
    pub fn sorted_by<F>(&self, compare: F) -> Self
    where
        V: Clone,
        F: FnMut((&K, &V), (&K, &V)) -> Ordering,
    {
        let copy = self.clone();
        copy.sort_by(compare);
        copy
    }
}

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts a stream over a shared map.
    pub fn stream(self: &Arc<Self>) -> Stream<K, V> {
        Stream::new(Arc::clone(self))
    }
}

impl<K, V> Default for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Copies the entries in order into a freshly packed map.
    fn clone(&self) -> Self {
        self.filter(|_, _, _| true)
    }
}

impl<K, V> FromIterator<(K, V)> for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::new();
        {
            let mut chain = map.write();
            for (key, value) in iter {
                let existing = chain.index.get(&key).copied();
                match existing {
                    Some(slot) => chain.node_mut(slot).value = value,
                    None => chain.push_tail(key, value),
                }
            }
        }
        map
    }
}

impl<K, V> PairSource<K, V> for Arc<OrderedMap<K, V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn pairs(&self, cancel: CancelToken) -> mpsc::Receiver<(K, V)> {
        let (tx, rx) = mpsc::channel(1);
        let map = Arc::clone(self);

        // The walk holds the read lock throughout, so it runs off the async workers.
        tokio::task::spawn_blocking(move || {
            let chain = map.read();
            for (_, node) in chain.iter() {
                if cancel.is_cancelled() {
                    return;
                }
                if tx
                    .blocking_send((node.key.clone(), node.value.clone()))
                    .is_err()
                {
                    return;
                }
            }
        });

        rx
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V> Destination<K, V> for OrderedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn set(&self, key: K, value: V) {
        self.put(key, value);
    }
}

impl<K, V> Destination<K, V> for Arc<OrderedMap<K, V>>
where
    K: Eq + Hash + Clone,
{
    fn set(&self, key: K, value: V) {
        self.put(key, value);
    }
}
