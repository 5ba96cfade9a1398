//! Ordered, subscribable collection of record handles.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

use crate::data::Data;
use crate::emitter::{EventEmitter, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ArrEvent {
    Changed,
}

type EmptyHook = Box<dyn FnOnce() + Send>;

/// Collection of shared [`Data`] handles. Clones share the same membership.
///
/// Membership holds references, never copies, so a record updated through its struct is
/// visible through every collection that contains it. Subscribers hear about membership
/// changes only.
pub struct DataArr<S> {
    inner: Arc<ArrInner<S>>,
}

struct ArrInner<S> {
    items: Mutex<Vec<Data<S>>>,
    subscribers: EventEmitter<ArrEvent, Vec<Data<S>>>,
    on_empty: Mutex<Vec<EmptyHook>>,
}

pub(crate) struct WeakDataArr<S> {
    inner: Weak<ArrInner<S>>,
}

impl<S> DataArr<S> {
    #[must_use]
    pub fn new(items: Vec<Data<S>>) -> Self {
        Self {
            inner: Arc::new(ArrInner {
                items: Mutex::new(items),
                subscribers: EventEmitter::new(),
                on_empty: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a membership callback. Unsubscribing the last subscriber runs the hooks
    /// registered with [`DataArr::on_all_unsubscribe`].
    pub fn subscribe(
        &self,
        callback: impl Fn(&[Data<S>]) + Send + Sync + 'static,
    ) -> Subscription
    where
        S: 'static,
    {
        let id = self
            .inner
            .subscribers
            .on(ArrEvent::Changed, move |items: &Vec<Data<S>>| callback(items));
        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.subscribers.off(&ArrEvent::Changed, Some(id));
            if inner.subscribers.listener_count(&ArrEvent::Changed) == 0 {
                let hooks = std::mem::take(&mut *lock(&inner.on_empty));
                for hook in hooks {
                    hook();
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.listener_count(&ArrEvent::Changed)
    }

    /// Runs `callback` once, the next time the subscriber set becomes empty.
    pub fn on_all_unsubscribe(&self, callback: impl FnOnce() + Send + 'static) {
        lock(&self.inner.on_empty).push(Box::new(callback));
    }

    pub fn get(&self, id: &str) -> Option<Data<S>> {
        self.lock_items()
            .iter()
            .find(|data| data.id() == id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock_items().iter().any(|data| data.id() == id)
    }

    /// Members whose `key` field currently equals `value`.
    pub fn from_property(&self, key: &str, value: &Value) -> Vec<Data<S>> {
        self.lock_items()
            .iter()
            .filter(|data| data.get(key).as_ref() == Some(value))
            .cloned()
            .collect()
    }

    /// Appends and notifies. Duplicate ids are not checked here.
    pub fn add(&self, items: impl IntoIterator<Item = Data<S>>) {
        let snapshot = {
            let mut current = self.lock_items();
            current.extend(items);
            current.clone()
        };
        self.notify(&snapshot);
    }

    /// Removes `data` by identity. Returns whether it was a member.
    pub fn remove(&self, data: &Data<S>) -> bool {
        let snapshot = {
            let mut current = self.lock_items();
            let Some(index) = current.iter().position(|member| member.ptr_eq(data)) else {
                return false;
            };
            current.remove(index);
            current.clone()
        };
        self.notify(&snapshot);
        true
    }

    pub fn items(&self) -> Vec<Data<S>> {
        self.lock_items().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock_items().iter().map(Data::id).collect()
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_items().is_empty()
    }

    /// Appends `data` unless a member with the same id exists.
    pub(crate) fn add_unique(&self, data: &Data<S>) -> bool {
        let id = data.id();
        let snapshot = {
            let mut current = self.lock_items();
            if current.iter().any(|member| member.id() == id) {
                return false;
            }
            current.push(data.clone());
            current.clone()
        };
        self.notify(&snapshot);
        true
    }

    /// Appends every item whose id is not yet present, notifying once. Returns how many
    /// were added.
    pub(crate) fn extend_unique(&self, items: impl IntoIterator<Item = Data<S>>) -> usize {
        let (added, snapshot) = {
            let mut current = self.lock_items();
            let before = current.len();
            for item in items {
                let id = item.id();
                if !current.iter().any(|member| member.id() == id) {
                    current.push(item);
                }
            }
            (current.len() - before, current.clone())
        };
        if added > 0 {
            self.notify(&snapshot);
        }
        added
    }

    pub(crate) fn remove_id(&self, id: &str) -> bool {
        let snapshot = {
            let mut current = self.lock_items();
            let before = current.len();
            current.retain(|member| member.id() != id);
            if current.len() == before {
                return false;
            }
            current.clone()
        };
        self.notify(&snapshot);
        true
    }

    pub(crate) fn downgrade(&self) -> WeakDataArr<S> {
        WeakDataArr {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn notify(&self, snapshot: &Vec<Data<S>>) {
        self.inner.subscribers.emit(&ArrEvent::Changed, snapshot);
    }

    fn lock_items(&self) -> MutexGuard<'_, Vec<Data<S>>> {
        lock(&self.inner.items)
    }
}

impl<S> WeakDataArr<S> {
    pub(crate) fn upgrade(&self) -> Option<DataArr<S>> {
        self.inner.upgrade().map(|inner| DataArr { inner })
    }
}

impl<S> Clone for WeakDataArr<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<S> Clone for DataArr<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Default for DataArr<S> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<S> fmt::Debug for DataArr<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataArr")
            .field("ids", &self.ids())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
