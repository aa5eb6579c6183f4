//! Generation-indexed storage. A [`Handle`] pairs a slot index with the
//! generation that slot had when the value was inserted; once the value is
//! removed the generation moves on and the old handle resolves to nothing.

use std::fmt;

/// Stable reference to a value stored in a [`HandleMap`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Slot index of the handle.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map returning generation-checked handles.
#[derive(Debug)]
pub struct HandleMap<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleMap<T> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores `value` and returns its handle.
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            return Handle {
                index,
                generation: entry.generation,
            };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        Handle {
            index,
            generation: 0,
        }
    }

    /// Removes the value behind `handle`. Stale handles return `None`.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let entry = self.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Resolves a handle.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.entries
            .get(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    /// Resolves a handle mutably.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    /// Returns `true` while `handle` resolves.
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Iterates over live values and their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.value.as_ref().map(|value| {
                (
                    Handle {
                        index: index as u32,
                        generation: entry.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Iterates mutably over live values and their handles.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(index, entry)| {
                let generation = entry.generation;
                entry.value.as_mut().map(|value| {
                    (
                        Handle {
                            index: index as u32,
                            generation,
                        },
                        value,
                    )
                })
            })
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the map holds no value.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for HandleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_handle_never_resolves_again() {
        let mut map = HandleMap::new();
        let old = map.insert("old");
        assert_eq!(map.remove(old), Some("old"));

        let new = map.insert("new");
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert!(map.get(old).is_none());
        assert!(map.remove(old).is_none());
        assert_eq!(map.get(new), Some(&"new"));
    }

    #[test]
    fn iteration_reports_current_handles() {
        let mut map = HandleMap::new();
        let a = map.insert(1);
        let b = map.insert(2);
        map.remove(a);
        let c = map.insert(3);

        let mut handles: Vec<_> = map.iter().map(|(handle, value)| (handle, *value)).collect();
        handles.sort();
        assert_eq!(handles, vec![(c, 3), (b, 2)]);
        assert_eq!(map.len(), 2);
    }
}
