//! Fixed capacity list used for neighbours, boundary segments, corners and
//! the crowd's request queues.

use std::ops::Index;

/// Inline list holding at most `N` items.
///
/// [`BoundedList::insert_sorted_by`] keeps the list ordered and evicts the last
/// item when a better one arrives while the list is full.
#[derive(Debug, Clone, Copy)]
pub struct BoundedList<T: Copy + Default, const N: usize> {
    items: [T; N],
    len: usize,
}

impl<T: Copy + Default, const N: usize> Default for BoundedList<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const N: usize> BoundedList<T, N> {
    pub fn new() -> Self {
        Self {
            items: [T::default(); N],
            len: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.items[..self.len]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }

    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    /// Appends an item. Returns false if the list is full.
    pub fn push(&mut self, item: T) -> bool {
        if self.len >= N {
            return false;
        }
        self.items[self.len] = item;
        self.len += 1;
        true
    }

    /// Inserts `item` before the first element it sorts before.
    ///
    /// `is_before(a, b)` must return true when `a` strictly precedes `b`, so items
    /// comparing equal keep their insertion order. When the list is full the last
    /// element is dropped; an item that would land past the end is rejected and
    /// false is returned.
    pub fn insert_sorted_by<F>(&mut self, item: T, is_before: F) -> bool
    where
        F: Fn(&T, &T) -> bool,
    {
        let idx = self
            .as_slice()
            .iter()
            .position(|existing| is_before(&item, existing))
            .unwrap_or(self.len);
        if idx >= N {
            return false;
        }

        let last = self.len.min(N - 1);
        self.items.copy_within(idx..last, idx + 1);
        self.items[idx] = item;
        self.len = (self.len + 1).min(N);
        true
    }

    /// Removes the item at `index`, shifting the tail down
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        let item = self.items[index];
        self.items.copy_within(index + 1..self.len, index);
        self.len -= 1;
        Some(item)
    }
}

impl<T: Copy + Default, const N: usize> Index<usize> for BoundedList<T, N> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<'a, T: Copy + Default, const N: usize> IntoIterator for &'a BoundedList<T, N> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_key(a: &(u32, f32), b: &(u32, f32)) -> bool {
        a.1 < b.1
    }

    #[test]
    fn test_sorted_insert_with_eviction() {
        let mut list: BoundedList<(u32, f32), 3> = BoundedList::new();
        assert!(list.insert_sorted_by((0, 5.0), by_key));
        assert!(list.insert_sorted_by((1, 1.0), by_key));
        assert!(list.insert_sorted_by((2, 3.0), by_key));
        assert!(list.is_full());

        // Worse than everything while full.
        assert!(!list.insert_sorted_by((3, 9.0), by_key));

        // Better than the tail, evicts the worst.
        assert!(list.insert_sorted_by((4, 2.0), by_key));
        let ids: Vec<u32> = list.iter().map(|e| e.0).collect();
        assert_eq!(ids, vec![1, 4, 2]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut list: BoundedList<(u32, f32), 4> = BoundedList::new();
        list.insert_sorted_by((0, 1.0), by_key);
        list.insert_sorted_by((1, 1.0), by_key);
        list.insert_sorted_by((2, 0.5), by_key);
        list.insert_sorted_by((3, 1.0), by_key);
        let ids: Vec<u32> = list.iter().map(|e| e.0).collect();
        assert_eq!(ids, vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_push_remove_truncate() {
        let mut list: BoundedList<u8, 2> = BoundedList::new();
        assert!(list.push(1));
        assert!(list.push(2));
        assert!(!list.push(3));
        assert_eq!(list.remove(0), Some(1));
        assert_eq!(list.as_slice(), &[2]);
        list.truncate(0);
        assert!(list.is_empty());
        assert_eq!(list.remove(0), None);
    }
}
