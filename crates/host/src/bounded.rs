//! Fixed-capacity list with an explicit overflow error

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("capacity of {capacity} exceeded")]
pub struct CapacityExceeded {
    pub capacity: usize,
}

/// Vector that refuses to grow past the capacity it was built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounded<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> Bounded<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn try_push(&mut self, item: T) -> Result<(), CapacityExceeded> {
        if self.items.len() >= self.capacity {
            return Err(CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T> std::ops::Index<usize> for Bounded<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<'a, T> IntoIterator for &'a Bounded<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_is_reported() {
        let mut list = Bounded::new(2);
        list.try_push(1).unwrap();
        list.try_push(2).unwrap();
        assert_eq!(list.try_push(3), Err(CapacityExceeded { capacity: 2 }));
        assert_eq!(list.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut list: Bounded<u8> = Bounded::new(0);
        assert!(list.try_push(0).is_err());
        assert!(list.is_empty());
    }
}
