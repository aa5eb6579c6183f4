//! # Slot Pool
//!
//! An arena of fixed slots indexed by a free list. Allocation is split into two
//! explicit steps so a value can be built knowing its own index:
//!
//! 1. [`SlotPool::reserve`] hands out the lowest free index and marks it reserved.
//! 2. [`SlotPool::construct`] stores the value in that reserved slot.
//!
//! Freeing is also split. [`SlotPool::take`] moves the value out and *retires* the
//! slot: it stays unusable until [`SlotPool::release`] returns it to the free
//! list. The server retires player slots on disconnect and releases them only
//! once the current tick no longer references the index.

use std::collections::BTreeSet;

#[derive(Debug)]
enum Slot<T> {
    Free,
    Reserved,
    Occupied(T),
    Retired,
}

/// Arena of reusable slots.
#[derive(Debug)]
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    free: BTreeSet<usize>,
    occupied: usize,
}

impl<T> SlotPool<T> {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            occupied: 0,
        }
    }

    /// Reserves the lowest free slot and returns its index.
    pub fn reserve(&mut self) -> usize {
        match self.free.pop_first() {
            Some(index) => {
                self.slots[index] = Slot::Reserved;
                index
            }
            None => {
                self.slots.push(Slot::Reserved);
                self.slots.len() - 1
            }
        }
    }

    /// Stores `value` in a slot previously returned by [`reserve`](Self::reserve).
    ///
    /// Returns `false` and drops nothing into the pool when the slot is not reserved.
    pub fn construct(&mut self, index: usize, value: T) -> bool {
        match self.slots.get_mut(index) {
            Some(slot @ Slot::Reserved) => {
                *slot = Slot::Occupied(value);
                self.occupied += 1;
                true
            }
            _ => false,
        }
    }

    /// Reserves a slot and constructs its value from the index in one call.
    pub fn allocate_with<F>(&mut self, build: F) -> usize
    where
        F: FnOnce(usize) -> T,
    {
        let index = self.reserve();
        let value = build(index);
        self.construct(index, value);
        index
    }

    /// Returns the value stored at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&T> {
        match self.slots.get(index) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns a mutable reference to the value stored at `index`, if any.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.slots.get_mut(index) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Moves the value out of its slot and retires the slot.
    pub fn take(&mut self, index: usize) -> Option<T> {
        let slot = self.slots.get_mut(index)?;
        if !matches!(slot, Slot::Occupied(_)) {
            return None;
        }
        match std::mem::replace(slot, Slot::Retired) {
            Slot::Occupied(value) => {
                self.occupied -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Returns a retired or reserved slot to the free list.
    ///
    /// Occupied and already free slots are left untouched.
    pub fn release(&mut self, index: usize) -> bool {
        match self.slots.get_mut(index) {
            Some(slot @ (Slot::Retired | Slot::Reserved)) => {
                *slot = Slot::Free;
                self.free.insert(index);
                true
            }
            _ => false,
        }
    }

    /// Iterates over occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(value) => Some((index, value)),
                _ => None,
            })
    }

    /// Iterates mutably over occupied slots in index order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(value) => Some((index, value)),
                _ => None,
            })
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied
    }

    /// Returns `true` when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Total number of slots ever created, free or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Default for SlotPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructed_value_knows_its_index() {
        let mut pool = SlotPool::new();
        let a = pool.allocate_with(|index| format!("player-{index}"));
        let b = pool.allocate_with(|index| format!("player-{index}"));
        assert_eq!(pool.get(a).map(String::as_str), Some("player-0"));
        assert_eq!(pool.get(b).map(String::as_str), Some("player-1"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn retired_slot_is_not_reused_until_released() {
        let mut pool = SlotPool::new();
        let first = pool.allocate_with(|_| 'a');
        pool.allocate_with(|_| 'b');

        assert_eq!(pool.take(first), Some('a'));
        assert_eq!(pool.reserve(), 2);

        assert!(pool.release(first));
        assert_eq!(pool.reserve(), first);
    }

    #[test]
    fn reserved_slot_is_invisible_until_constructed() {
        let mut pool: SlotPool<u32> = SlotPool::new();
        let index = pool.reserve();
        assert!(pool.get(index).is_none());
        assert!(pool.is_empty());
        assert!(pool.construct(index, 9));
        assert!(!pool.construct(index, 10));
        assert_eq!(pool.get(index), Some(&9));
    }

    #[test]
    fn lowest_free_index_is_reused_first() {
        let mut pool = SlotPool::new();
        for value in 0..4 {
            pool.allocate_with(|_| value);
        }
        for index in [3, 1] {
            pool.take(index);
            pool.release(index);
        }
        assert_eq!(pool.reserve(), 1);
        assert_eq!(pool.reserve(), 3);
        assert_eq!(pool.reserve(), 4);
    }

    #[test]
    fn iteration_skips_empty_slots() {
        let mut pool = SlotPool::new();
        for value in 0..3 {
            pool.allocate_with(|_| value * 10);
        }
        pool.take(1);
        let collected: Vec<_> = pool.iter().map(|(index, value)| (index, *value)).collect();
        assert_eq!(collected, vec![(0, 0), (2, 20)]);
    }
}
