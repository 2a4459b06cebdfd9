use std::collections::BTreeMap;

/// Releases indexed items strictly in ascending index order.
///
/// Items ahead of the next expected index are held back until the gap before
/// them closes. A `None` item is a terminal failure marker: it is released in
/// order like any other item so the consumer can step over the gap.
pub struct ReorderBuffer<T> {
    buffer: BTreeMap<usize, Option<T>>,
    next_index: usize,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            buffer: BTreeMap::new(),
            next_index: 0,
        }
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Number of items held back waiting for an earlier index.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Accept an item and return every item that became releasable, in order.
    ///
    /// Indices below the expected one have already been released; they are
    /// dropped and logged.
    pub fn push(&mut self, index: usize, item: Option<T>) -> Vec<(usize, Option<T>)> {
        if index < self.next_index {
            log::warn!("Segment {index} arrived after it was already released, ignoring.");
            return Vec::new();
        }
        if self.buffer.insert(index, item).is_some() {
            log::warn!("Segment {index} arrived twice, keeping the latest one.");
        }

        let mut ready = Vec::new();
        while let Some(item) = self.buffer.remove(&self.next_index) {
            ready.push((self.next_index, item));
            self.next_index += 1;
        }
        ready
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
