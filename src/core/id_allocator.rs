use bitvec::prelude::BitVec;

/// Allocates small integer ids, always handing out the smallest free one.
///
/// Used for the per-session network ids of entities and chunks, which must stay
/// small on the wire and are recycled once a client has been told an id is gone.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    used: BitVec,
    capacity: usize,
}

impl IdAllocator {
    /// Creates an allocator able to hand out every `u16` value.
    pub fn new() -> Self {
        Self::with_capacity(usize::from(u16::MAX) + 1)
    }

    /// Creates an allocator limited to ids `0..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            used: BitVec::new(),
            capacity: capacity.min(usize::from(u16::MAX) + 1),
        }
    }

    /// Allocates the smallest free id, or `None` once every id is taken.
    pub fn allocate(&mut self) -> Option<u16> {
        let index = match self.used.first_zero() {
            Some(index) => index,
            None if self.used.len() < self.capacity => {
                self.used.push(false);
                self.used.len() - 1
            }
            None => return None,
        };
        self.used.set(index, true);
        u16::try_from(index).ok()
    }

    /// Frees an id. Releasing a free id is a no-op.
    pub fn release(&mut self, id: u16) {
        let index = usize::from(id);
        if index < self.used.len() {
            self.used.set(index, false);
        }
    }

    /// Returns `true` while `id` is allocated.
    pub fn is_allocated(&self, id: u16) -> bool {
        self.used
            .get(usize::from(id))
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    /// Number of ids currently allocated.
    pub fn allocated_count(&self) -> usize {
        self.used.count_ones()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_free_id_first() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate(), Some(0));
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));
        ids.release(1);
        assert!(!ids.is_allocated(1));
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(3));
        assert_eq!(ids.allocated_count(), 4);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut ids = IdAllocator::with_capacity(2);
        assert!(ids.allocate().is_some());
        assert!(ids.allocate().is_some());
        assert_eq!(ids.allocate(), None);
        ids.release(0);
        assert_eq!(ids.allocate(), Some(0));
    }
}
