use std::collections::VecDeque;
use std::fmt;

/// Fixed-capacity FIFO holding the most recent frames. Once full, every
/// push evicts the oldest entry.
pub struct RingBuffer<T> {
    deque: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> Clone for RingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            deque: self.deque.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deque.fmt(f)
    }
}

impl<T> RingBuffer<T> {
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            deque: VecDeque::with_capacity(cap),
            capacity: cap,
        }
    }

    /// Appends `item`, returning whatever had to be evicted to make room.
    /// With zero capacity the item itself is handed back.
    #[inline]
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }

        let evicted = if self.is_full() {
            self.deque.pop_front()
        } else {
            None
        };

        self.deque.push_back(item);

        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.deque.len() == self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn clear(&mut self) {
        self.deque.clear()
    }

    /// Oldest first.
    #[inline]
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &'_ T> + ExactSizeIterator {
        self.deque.iter()
    }

    #[inline]
    pub fn newest(&self) -> Option<&T> {
        self.deque.back()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Current contents in arrival order; the buffer itself is untouched.
    pub fn snapshot(&self) -> Vec<T> {
        self.deque.iter().cloned().collect()
    }
}
