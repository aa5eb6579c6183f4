//! # Signals
//!
//! Typed, synchronous event subscription used by chunks and chunk containers to
//! announce structural and content changes.
//!
//! A [`Signal`] is a cheap cloneable handle: every clone shares the same list of
//! subscribers, so an owner can hand a clone to whoever needs to emit or connect
//! without lending out a reference to itself. Delivery happens on the emitting
//! thread, in connection order, before `emit` returns.

use std::{cell::RefCell, fmt, rc::Rc};

/// Identifies one subscription so it can later be disconnected.
pub type SubscriptionId = u64;

type Callback<E> = Rc<RefCell<dyn FnMut(&E)>>;

struct SignalInner<E> {
    next_id: SubscriptionId,
    subscribers: Vec<(SubscriptionId, Callback<E>)>,
}

/// A list of callbacks invoked with a borrowed event each time the signal fires.
///
/// # Examples
///
/// ```
/// use std::{cell::Cell, rc::Rc};
/// use voxel_server::core::Signal;
///
/// let signal = Signal::<u32>::new();
/// let total = Rc::new(Cell::new(0));
///
/// let sink = total.clone();
/// let id = signal.connect(move |value| sink.set(sink.get() + value));
///
/// signal.emit(&3);
/// signal.disconnect(id);
/// signal.emit(&4);
///
/// assert_eq!(total.get(), 3);
/// ```
pub struct Signal<E> {
    inner: Rc<RefCell<SignalInner<E>>>,
}

impl<E> Signal<E> {
    /// Creates a signal with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SignalInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Registers a callback and returns the id needed to disconnect it.
    pub fn connect<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&E) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let callback: Callback<E> = Rc::new(RefCell::new(callback));
        inner.subscribers.push((id, callback));
        id
    }

    /// Removes a subscription. Returns `false` if the id was unknown.
    pub fn disconnect(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(subscription, _)| *subscription != id);
        inner.subscribers.len() != before
    }

    /// Delivers `event` to every subscriber.
    ///
    /// Subscribers may connect or disconnect (themselves or others) from inside
    /// their callback. A subscriber disconnected mid-emission is not called for
    /// the rest of it; one connected mid-emission is first called on the next emit.
    /// A callback that re-emits the same signal is not re-entered.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<(SubscriptionId, Callback<E>)> = self
            .inner
            .borrow()
            .subscribers
            .iter()
            .map(|(id, callback)| (*id, callback.clone()))
            .collect();

        for (id, callback) in snapshot {
            if !self.is_connected(id) {
                continue;
            }
            if let Ok(mut callback) = callback.try_borrow_mut() {
                (&mut *callback)(event);
            }
        }
    }

    /// Returns `true` while the subscription is registered.
    pub fn is_connected(&self, id: SubscriptionId) -> bool {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .any(|(subscription, _)| *subscription == id)
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

impl<E> Clone for Signal<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delivers_in_connection_order() {
        let signal = Signal::<&'static str>::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let first = log.clone();
        signal.connect(move |event| first.borrow_mut().push(format!("a:{event}")));
        let second = log.clone();
        signal.connect(move |event| second.borrow_mut().push(format!("b:{event}")));

        signal.emit(&"x");
        assert_eq!(*log.borrow(), vec!["a:x".to_string(), "b:x".to_string()]);
    }

    #[test]
    fn clones_share_subscribers() {
        let signal = Signal::<u8>::new();
        let clone = signal.clone();
        let hits = Rc::new(Cell::new(0));
        let sink = hits.clone();
        clone.connect(move |_| sink.set(sink.get() + 1));

        signal.emit(&0);
        assert_eq!(hits.get(), 1);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn subscriber_can_disconnect_another_during_emit() {
        let signal = Signal::<()>::new();
        let hits = Rc::new(Cell::new(0));

        let victim_id = Rc::new(Cell::new(None));
        let handle = signal.clone();
        let victim = victim_id.clone();
        signal.connect(move |_| {
            if let Some(id) = victim.get() {
                handle.disconnect(id);
            }
        });
        let sink = hits.clone();
        victim_id.set(Some(signal.connect(move |_| sink.set(sink.get() + 1))));

        signal.emit(&());
        assert_eq!(hits.get(), 0);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn disconnect_unknown_id_returns_false() {
        let signal = Signal::<()>::new();
        assert!(!signal.disconnect(42));
    }
}
