/// Fixed-capacity FIFO ring buffer.
///
/// Storage is allocated once; when full, a push overwrites the oldest entry in
/// place instead of shifting. Iteration always runs oldest to newest.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    /// Index of the oldest entry once the buffer is full, 0 before that.
    head: usize,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(value);
        } else {
            self.buffer[self.head] = value;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }

    /// Entry at logical position `index`, 0 being the oldest.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.buffer.len() {
            return None;
        }
        Some(&self.buffer[(self.head + index) % self.buffer.len()])
    }

    /// Most recently pushed entry.
    pub fn last(&self) -> Option<&T> {
        match self.buffer.len() {
            0 => None,
            len => self.get(len - 1),
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (newer, older) = self.buffer.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// The newest `n` entries, oldest first.
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &T> + '_ {
        self.iter().skip(self.len().saturating_sub(n))
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl RingBuffer<f32> {
    pub fn mean(&self) -> f32 {
        if self.buffer.is_empty() {
            return 0.0;
        }
        self.buffer.iter().sum::<f32>() / self.buffer.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut ring = RingBuffer::new(3);
        for v in 1..=5 {
            ring.push(v);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.to_vec(), vec![3, 4, 5]);
        assert_eq!(ring.get(0), Some(&3));
        assert_eq!(ring.last(), Some(&5));
    }

    #[test]
    fn never_grows_past_capacity() {
        let mut ring = RingBuffer::new(8);
        for v in 0..1000 {
            ring.push(v);
            assert!(ring.len() <= 8);
        }
        assert!(ring.is_full());
        assert_eq!(ring.to_vec(), (992..1000).collect::<Vec<_>>());
    }

    #[test]
    fn latest_returns_tail_in_order() {
        let mut ring = RingBuffer::new(4);
        for v in 0..6 {
            ring.push(v);
        }
        let tail: Vec<_> = ring.latest(2).copied().collect();
        assert_eq!(tail, vec![4, 5]);
        let all: Vec<_> = ring.latest(10).copied().collect();
        assert_eq!(all, vec![2, 3, 4, 5]);
    }

    #[test]
    fn clear_resets_order() {
        let mut ring = RingBuffer::new(2);
        ring.push(1.0f32);
        ring.push(2.0);
        ring.push(3.0);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.mean(), 0.0);
        ring.push(7.0);
        assert_eq!(ring.to_vec(), vec![7.0]);
    }

    #[test]
    fn mean_of_partial_buffer() {
        let mut ring = RingBuffer::new(10);
        ring.push(1.0f32);
        ring.push(3.0);
        assert!((ring.mean() - 2.0).abs() < 1e-6);
    }
}
