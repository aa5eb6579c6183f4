//! Shared state for data accessed from several threads.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A thread-safe, reference-counted resource container with read-write locking.
///
/// `MtResource` provides synchronized access to a value of type `T` that can be shared
/// across threads. It uses an `Arc<RwLock<T>>` internally to manage concurrent access.
/// Chunk block grids live in an `MtResource` so that background collider builds can
/// read them while the simulation thread keeps sole ownership of every write.
///
/// # Type Parameters
/// - `T`: The type of the contained resource, must be `Send + Sync`
///
/// # Examples
///
/// ```
/// use voxel_server::core::MtResource;
///
/// let grid = MtResource::new(vec![0u8; 8]);
/// let reader = grid.clone();
///
/// grid.get_mut()[3] = 7;
///
/// let handle = std::thread::spawn(move || reader.get()[3]);
/// assert_eq!(handle.join().unwrap(), 7);
/// ```
///
/// # Poisoning
/// A writer that panics while holding the lock poisons it. Grid writes are single
/// assignments, so a poisoned guard never exposes a half-written value and the lock
/// is recovered instead of propagating the panic to every future reader.
pub struct MtResource<T: Send + Sync> {
    resource: Arc<RwLock<T>>,
}

impl<T: Send + Sync + 'static> MtResource<T> {
    /// Creates a new `MtResource` containing the given value.
    ///
    /// # Arguments
    /// * `resource` - The value to be stored in the resource
    ///
    /// # Returns
    /// A new `MtResource` containing the provided value
    pub fn new(resource: T) -> Self {
        Self {
            resource: Arc::new(RwLock::new(resource)),
        }
    }

    /// Returns a read-only guard that allows reading the contained value.
    ///
    /// Any number of readers may hold a guard at the same time.
    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.resource
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a mutable guard that allows modifying the contained value.
    ///
    /// Blocks until every outstanding read guard has been released.
    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.resource
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` when both handles point at the same underlying value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }
}

impl<T: Send + Sync> Clone for MtResource<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}

impl<T: Send + Sync + std::fmt::Debug> std::fmt::Debug for MtResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.resource.try_read() {
            Ok(guard) => f.debug_tuple("MtResource").field(&*guard).finish(),
            Err(_) => f.write_str("MtResource(<locked>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn writes_are_visible_to_clones() {
        let resource = MtResource::new(vec![1u8, 2, 3]);
        let clone = resource.clone();
        clone.get_mut().push(4);
        assert_eq!(resource.get().len(), 4);
        assert!(resource.ptr_eq(&clone));
    }

    #[test]
    fn readers_on_other_threads_see_latest_value() {
        let counter = MtResource::new(0u32);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || *counter.get_mut() += 1)
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.get(), 4);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let resource = MtResource::new(5u32);
        let clone = resource.clone();
        let _ = thread::spawn(move || {
            let _guard = clone.get_mut();
            panic!("writer panicked");
        })
        .join();
        assert_eq!(*resource.get(), 5);
    }
}
