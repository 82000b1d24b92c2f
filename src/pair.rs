/// A key/value pair tagged with the position its source emitted it at.
///
/// The position is stamped once by the feeder and survives every stage
/// unchanged, which lets a terminal consumer recover the source order after
/// concurrent workers have shuffled the arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexedPair<K, V> {
    pub position: usize,
    pub key: K,
    pub value: V,
}

impl<K, V> IndexedPair<K, V> {
    pub fn new(position: usize, key: K, value: V) -> Self {
        Self {
            position,
            key,
            value,
        }
    }

    /// Replaces the value, keeping key and position.
    pub fn with_value<N>(self, value: N) -> IndexedPair<K, N> {
        IndexedPair {
            position: self.position,
            key: self.key,
            value,
        }
    }

    pub fn map_value<N, F>(self, f: F) -> IndexedPair<K, N>
    where
        F: FnOnce(V) -> N,
    {
        IndexedPair {
            position: self.position,
            key: self.key,
            value: f(self.value),
        }
    }

    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}
