use crate::models::notification::Notification;

/// Max-heap of notifications keyed by `priority`.
///
/// Every queued notification carries its own array position in `index`, which
/// makes `remove` O(log n). The index is cleared when an item leaves the heap.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    items: Vec<Notification>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn peek(&self) -> Option<&Notification> {
        self.items.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }

    pub fn push(&mut self, mut notification: Notification) {
        let n = self.items.len();
        notification.index = Some(n);
        self.items.push(notification);
        self.up(n);
    }

    pub fn pop(&mut self) -> Option<Notification> {
        if self.items.is_empty() {
            return None;
        }

        let last = self.items.len() - 1;
        self.swap(0, last);
        self.down(0, last);
        self.take_last()
    }

    /// Removes the element currently stored at heap position `index`.
    pub fn remove(&mut self, index: usize) -> Option<Notification> {
        if index >= self.items.len() {
            return None;
        }

        let last = self.items.len() - 1;
        if index != last {
            self.swap(index, last);
            if !self.down(index, last) {
                self.up(index);
            }
        }
        self.take_last()
    }

    /// Re-establishes the heap ordering after the priority at `index` changed.
    pub fn fix(&mut self, index: usize) {
        if index >= self.items.len() {
            return;
        }

        if !self.down(index, self.items.len()) {
            self.up(index);
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Notification> {
        self.items.get_mut(index)
    }

    fn take_last(&mut self) -> Option<Notification> {
        let mut item = self.items.pop()?;
        item.index = None;
        Some(item)
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.items[i].priority > self.items[j].priority
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.items.swap(i, j);
        self.items[i].index = Some(i);
        self.items[j].index = Some(j);
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.less(j, parent) {
                break;
            }
            self.swap(parent, j);
            j = parent;
        }
    }

    /// Sifts element `i0` down within `items[..n]`; returns whether it moved.
    fn down(&mut self, i0: usize, n: usize) -> bool {
        let mut i = i0;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }

            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }

            if !self.less(child, i) {
                break;
            }

            self.swap(i, child);
            i = child;
        }
        i > i0
    }
}
