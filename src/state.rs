//! Reactive scalar state.
//!
//! [`ValueState`] is a value cell with a list of observers. Every `set` that
//! actually changes the value notifies the observers synchronously, before
//! `set` returns. Observers receive the current value when they subscribe, so
//! a subscription started late still sees where things stand.
//!
//! Every state is tied to a [`Lifecycle`] token owned by its entity. Once the
//! token is ended the state drops its observers, ignores new subscriptions
//! and stops emitting.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Handle returned by `select`, used to unsubscribe.
pub type SubscriptionId = u64;

type Observer<T> = Box<dyn FnMut(&T)>;

/// Destruction token shared between an entity and the states it owns.
#[derive(Clone, Default)]
pub struct Lifecycle {
    ended: Rc<Cell<bool>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the owning entity as destroyed. Idempotent.
    pub fn end(&self) {
        self.ended.set(true);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.get()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// A reactive value cell with deduplicated, synchronous notifications.
pub struct ValueState<T> {
    value: T,
    observers: Vec<(SubscriptionId, Observer<T>)>,
    next_id: SubscriptionId,
    lifecycle: Lifecycle,
}

impl<T> ValueState<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a state bound to the given lifecycle.
    pub fn new(value: T, lifecycle: &Lifecycle) -> Self {
        Self {
            value,
            observers: Vec::new(),
            next_id: 1,
            lifecycle: lifecycle.clone(),
        }
    }

    /// Borrow the current value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Update the value.
    ///
    /// Returns `true` if the value changed. Unchanged values are not emitted.
    pub fn set(&mut self, value: T) -> bool {
        if self.lifecycle.is_ended() {
            self.observers.clear();
            self.value = value;
            return false;
        }
        if self.value == value {
            return false;
        }
        self.value = value;
        for (_, observer) in self.observers.iter_mut() {
            observer(&self.value);
        }
        true
    }

    /// Update the value in place through a closure.
    pub fn update(&mut self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.value.clone();
        f(&mut next);
        self.set(next)
    }

    /// Subscribe to the value.
    ///
    /// The observer is called immediately with the current value and then on
    /// every change. Each call starts an independent subscription. Returns
    /// `None` when the owning entity is already destroyed.
    pub fn select(&mut self, mut observer: impl FnMut(&T) + 'static) -> Option<SubscriptionId> {
        if self.lifecycle.is_ended() {
            return None;
        }
        observer(&self.value);
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        Some(id)
    }

    /// Subscribe to a projection of the value.
    ///
    /// The projection is deduplicated on its own: the observer only fires
    /// when the projected value changes.
    pub fn select_map<U, M, F>(&mut self, map: M, mut observer: F) -> Option<SubscriptionId>
    where
        U: PartialEq + 'static,
        M: Fn(&T) -> U + 'static,
        F: FnMut(&U) + 'static,
    {
        let mut last: Option<U> = None;
        self.select(move |value| {
            let projected = map(value);
            if last.as_ref() != Some(&projected) {
                observer(&projected);
                last = Some(projected);
            }
        })
    }

    /// Drop a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    /// Release every observer.
    pub fn close(&mut self) {
        self.observers.clear();
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// A new state holding the same value, bound to another lifecycle and
    /// without any observers.
    pub fn fork(&self, lifecycle: &Lifecycle) -> Self {
        Self::new(self.value.clone(), lifecycle)
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueState")
            .field("value", &self.value)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// A broadcast list for one-shot notifications that carry no state.
pub struct EventEmitter<E> {
    observers: Vec<(SubscriptionId, Box<dyn FnMut(&E)>)>,
    next_id: SubscriptionId,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
            next_id: 1,
        }
    }
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&E) + 'static) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        for (_, observer) in self.observers.iter_mut() {
            observer(event);
        }
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl<E> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("observers", &self.observers.len())
            .finish()
    }
}
