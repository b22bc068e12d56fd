//! FIFO Queue
//!
//! Two-stack queue with amortized O(1) push and pop. `incoming` takes
//! pushes, `outgoing` holds the front of the queue in reverse order and
//! is refilled from `incoming` only when it runs dry.

/// Double-buffer FIFO queue
#[derive(Debug, Clone)]
pub struct FifoQueue<T> {
    /// Push target (back of the queue is the last element)
    incoming: Vec<T>,
    /// Pop source (front of the queue is the last element)
    outgoing: Vec<T>,
}

impl<T> FifoQueue<T> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Create with room for `capacity` pushes before reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            incoming: Vec::with_capacity(capacity),
            outgoing: Vec::new(),
        }
    }

    /// Append to the back
    pub fn push_back(&mut self, value: T) {
        self.incoming.push(value);
    }

    /// Insert at the front, ahead of everything queued
    pub fn push_front(&mut self, value: T) {
        self.outgoing.push(value);
    }

    /// Insert so that `value` ends up at position `index` from the front
    ///
    /// `index` is clamped to the queue length.
    pub fn insert(&mut self, index: usize, value: T) {
        let len = self.len();
        if index >= len {
            self.push_back(value);
            return;
        }
        if self.outgoing.len() < index {
            self.refill();
        }
        let at = self.outgoing.len() - index;
        self.outgoing.insert(at, value);
    }

    /// Remove from the front
    pub fn pop_front(&mut self) -> Option<T> {
        if self.outgoing.is_empty() {
            self.refill();
        }
        self.outgoing.pop()
    }

    /// Peek at the front
    pub fn front(&self) -> Option<&T> {
        self.outgoing.last().or_else(|| self.incoming.first())
    }

    /// Mutable access to the back
    pub fn back_mut(&mut self) -> Option<&mut T> {
        if self.incoming.is_empty() {
            self.outgoing.first_mut()
        } else {
            self.incoming.last_mut()
        }
    }

    /// Number of queued values
    pub fn len(&self) -> usize {
        self.incoming.len() + self.outgoing.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty() && self.outgoing.is_empty()
    }

    /// Remove every value in FIFO order
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.refill();
        self.outgoing.drain(..).rev()
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.incoming.clear();
        self.outgoing.clear();
    }

    /// Move `incoming` under the existing `outgoing` contents
    fn refill(&mut self) {
        if self.incoming.is_empty() {
            return;
        }
        if self.outgoing.is_empty() {
            self.incoming.reverse();
            std::mem::swap(&mut self.incoming, &mut self.outgoing);
        } else {
            let mut moved: Vec<T> = self.incoming.drain(..).rev().collect();
            moved.append(&mut self.outgoing);
            self.outgoing = moved;
        }
    }
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Extend<T> for FifoQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.incoming.extend(iter);
    }
}

impl<T> FromIterator<T> for FifoQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            incoming: iter.into_iter().collect(),
            outgoing: Vec::new(),
        }
    }
}
