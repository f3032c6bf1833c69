use crate::error::SignalError;
use serde::{Deserialize, Serialize};

const GROWTH_MULTIPLIER: usize = 3;

/// Fixed-capacity sliding window.
///
/// Only the last `capacity` pushed items are visible. Evicted items are not
/// shifted out one by one: the backing store is allowed to grow up to
/// `3 × capacity` slots, at which point the live window is copied back to the
/// front in a single compaction. Push is therefore O(1) amortized and the
/// backing allocation never grows past its initial reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "BufferRepr<T>", try_from = "BufferRepr<T>")]
#[serde(bound(
    serialize = "T: Clone + Serialize",
    deserialize = "T: Clone + Deserialize<'de>"
))]
pub struct BoundedBuffer<T> {
    slots: Vec<T>,
    start: usize,
    capacity: usize,
}

#[derive(Serialize, Deserialize)]
struct BufferRepr<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T: Clone> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self, SignalError> {
        if capacity == 0 {
            return Err(SignalError::Config(
                "bounded buffer capacity must be > 0".into(),
            ));
        }
        Ok(Self {
            slots: Vec::with_capacity(capacity * GROWTH_MULTIPLIER),
            start: 0,
            capacity,
        })
    }

    /// Creates a buffer pre-filled with `initial_len` default values
    /// (clamped to `capacity`).
    pub fn with_len(initial_len: usize, capacity: usize) -> Result<Self, SignalError>
    where
        T: Default,
    {
        let mut buf = Self::new(capacity)?;
        buf.slots.resize(initial_len.min(capacity), T::default());
        Ok(buf)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn growth_ceiling(&self) -> usize {
        self.capacity * GROWTH_MULTIPLIER
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len() - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `item` and returns the element that fell out of the window, if
    /// any.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.slots.len() == self.growth_ceiling() {
            self.compact();
        }
        self.slots.push(item);
        if self.len() > self.capacity {
            let evicted = self.slots[self.start].clone();
            self.start += 1;
            return Some(evicted);
        }
        None
    }

    /// Element `index` positions from the oldest visible item.
    #[inline]
    pub fn at(&self, index: usize) -> Option<&T> {
        self.items().get(index)
    }

    /// Element `index` positions back from the newest item (0 = newest).
    #[inline]
    pub fn from_back(&self, index: usize) -> Option<&T> {
        let len = self.len();
        if index >= len {
            return None;
        }
        self.at(len - index - 1)
    }

    /// Visible window, oldest first.
    #[inline]
    pub fn items(&self) -> &[T] {
        &self.slots[self.start..]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items().iter()
    }

    /// Removes the first element equal to `item`, shifting the rest down.
    ///
    /// This is a linear scan plus a shift; keep it off hot paths.
    pub fn remove(&mut self, item: &T) -> Result<T, SignalError>
    where
        T: PartialEq + std::fmt::Debug,
    {
        match self.items().iter().position(|x| x == item) {
            Some(pos) => Ok(self.slots.remove(self.start + pos)),
            None => Err(SignalError::InvariantViolation(format!(
                "trying to remove {item:?} which is not in the buffer"
            ))),
        }
    }

    fn compact(&mut self) {
        self.slots.drain(..self.start);
        self.start = 0;
    }

    #[cfg(test)]
    fn backing_len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    fn backing_capacity(&self) -> usize {
        self.slots.capacity()
    }
}

impl<T: Clone> From<BoundedBuffer<T>> for BufferRepr<T> {
    fn from(buf: BoundedBuffer<T>) -> Self {
        Self {
            capacity: buf.capacity,
            items: buf.items().to_vec(),
        }
    }
}

impl<T: Clone> TryFrom<BufferRepr<T>> for BoundedBuffer<T> {
    type Error = SignalError;

    fn try_from(repr: BufferRepr<T>) -> Result<Self, Self::Error> {
        let mut buf = BoundedBuffer::new(repr.capacity)?;
        for item in repr.items {
            buf.push(item);
        }
        Ok(buf)
    }
}
