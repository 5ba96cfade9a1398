//! Minimal synchronous publish/subscribe used for every change notification in the crate.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Handle of one registered listener, unique within its emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Keyed listener registry.
///
/// Listeners run synchronously, in registration order, outside the internal lock, so a
/// listener may register or remove listeners (including on the same emitter) while an
/// emission is in flight. A listener removed mid-emission is skipped if it has not run
/// yet; a listener removing itself finishes its current invocation.
pub struct EventEmitter<E, A> {
    state: Mutex<EmitterState<E, A>>,
}

struct EmitterState<E, A> {
    next_id: u64,
    listeners: HashMap<E, Vec<(ListenerId, Listener<A>)>>,
}

impl<E, A> EventEmitter<E, A>
where
    E: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EmitterState {
                next_id: 0,
                listeners: HashMap::new(),
            }),
        }
    }

    pub fn on(&self, event: E, listener: impl Fn(&A) + Send + Sync + 'static) -> ListenerId {
        self.on_shared(event, Arc::new(listener))
    }

    pub fn on_shared(&self, event: E, listener: Listener<A>) -> ListenerId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = ListenerId(state.next_id);
        state.listeners.entry(event).or_default().push((id, listener));
        id
    }

    /// Removes one listener, or every listener of `event` when `id` is `None`.
    /// Returns how many were removed.
    pub fn off(&self, event: &E, id: Option<ListenerId>) -> usize {
        let mut state = self.lock();
        let Some(listeners) = state.listeners.get_mut(event) else {
            return 0;
        };
        let before = listeners.len();
        match id {
            Some(id) => listeners.retain(|(candidate, _)| *candidate != id),
            None => listeners.clear(),
        }
        let removed = before - listeners.len();
        if listeners.is_empty() {
            state.listeners.remove(event);
        }
        removed
    }

    /// Invokes the listeners of `event`, returning how many ran. No listeners is a no-op.
    pub fn emit(&self, event: &E, args: &A) -> usize {
        let snapshot = match self.lock().listeners.get(event) {
            Some(listeners) => listeners.clone(),
            None => return 0,
        };

        let mut invoked = 0;
        for (id, listener) in snapshot {
            if !self.is_registered(event, id) {
                continue;
            }
            listener(args);
            invoked += 1;
        }
        invoked
    }

    pub fn destroy(&self) {
        self.lock().listeners.clear();
    }

    pub fn listener_count(&self, event: &E) -> usize {
        self.lock().listeners.get(event).map_or(0, Vec::len)
    }

    pub fn is_registered(&self, event: &E, id: ListenerId) -> bool {
        self.lock()
            .listeners
            .get(event)
            .is_some_and(|listeners| listeners.iter().any(|(candidate, _)| *candidate == id))
    }

    pub fn is_empty(&self) -> bool {
        self.lock().listeners.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, EmitterState<E, A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E, A> Default for EventEmitter<E, A>
where
    E: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, A> fmt::Debug for EventEmitter<E, A>
where
    E: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let counts = state
            .listeners
            .iter()
            .map(|(event, listeners)| (event.clone(), listeners.len()))
            .collect::<Vec<_>>();
        f.debug_struct("EventEmitter")
            .field("listeners", &counts)
            .finish()
    }
}

/// Registration handle returned by `subscribe` methods. Dropping it without calling
/// [`Subscription::unsubscribe`] leaves the callback registered.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}
