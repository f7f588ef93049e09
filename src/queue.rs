//! FIFO output buffer owned by each stage.

use std::collections::VecDeque;

/// An unbounded FIFO of outputs a stage has produced but its downstream
/// neighbor has not yet pulled.
///
/// Each stage owns exactly one queue: only the stage's own `run` pushes
/// into it, and only the engine removes from it (on behalf of the
/// downstream neighbor, or to take the final result from the last stage).
#[derive(Debug)]
pub struct OutputQueue<T> {
    items: VecDeque<T>,
}

impl<T> OutputQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append a produced output.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// True iff the queue holds at least one output.
    pub fn can_give(&self) -> bool {
        !self.items.is_empty()
    }

    /// Remove and return the oldest queued output.
    pub fn give(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of queued outputs.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True iff the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for OutputQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_give_is_fifo() {
        let mut queue = OutputQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.give(), Some(1));
        assert_eq!(queue.give(), Some(2));
        assert_eq!(queue.give(), Some(3));
        assert_eq!(queue.give(), None);
    }

    #[test]
    fn test_can_give_tracks_contents() {
        let mut queue = OutputQueue::default();
        assert!(!queue.can_give());
        assert!(queue.is_empty());

        queue.push("item");
        assert!(queue.can_give());
        assert_eq!(queue.len(), 1);

        queue.give();
        assert!(!queue.can_give());
    }
}
