//! Schema registration, identity map and push-event wiring for one record type.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::binding::Binding;
use crate::client::SyncClient;
use crate::column::{GlobalField, Row, Schema, Structure};
use crate::data::{Data, text_field};
use crate::data_arr::DataArr;
use crate::emitter::{EventEmitter, ListenerId};
use crate::error::{DataError, FatalDataError, StructError, ValidationError};
use crate::registry::{ClaimToken, StructRegistry};
use crate::transport::{Socket, push_event_name};

/// Local notification raised after a push event has been applied to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructEvent {
    New,
    Update,
    Archive,
    Restore,
    Delete,
    RestoreVersion,
}

impl StructEvent {
    pub const ALL: [Self; 6] = [
        Self::New,
        Self::Update,
        Self::Archive,
        Self::Restore,
        Self::Delete,
        Self::RestoreVersion,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Update => "update",
            Self::Archive => "archive",
            Self::Restore => "restore",
            Self::Delete => "delete",
            Self::RestoreVersion => "restore-version",
        }
    }
}

type PushApply<S> = fn(&StructInner<S>, &Value);

/// Filter of a live collection beyond "not archived".
type PropertyFilter = Option<(String, Value)>;

/// Synchronization controller for schema `S`.
///
/// Owns the identity map: every record handed out for a given id is the same [`Data`]
/// instance until it is deleted or evicted. The cache is only ever populated from push
/// events and query responses; `create`, `update`, `delete` and archival calls never touch
/// it directly.
///
/// Clones share state. Dropping the last clone detaches the push handlers and releases the
/// name in the registry.
pub struct Struct<S: Schema> {
    inner: Arc<StructInner<S>>,
}

struct StructInner<S> {
    binding: Arc<Binding>,
    socket: Arc<dyn Socket>,
    registry: StructRegistry,
    claim: ClaimToken,
    cache: Mutex<HashMap<String, Data<S>>>,
    events: EventEmitter<StructEvent, Data<S>>,
    all_view: DataArr<S>,
    archived_view: DataArr<S>,
    push_listeners: Mutex<Vec<(String, ListenerId)>>,
    closed: AtomicBool,
}

impl<S: Schema> Struct<S> {
    /// Claims `S::NAME` in the client's registry, attaches the push handlers and announces
    /// the structure to the store in the background.
    pub fn new(client: &SyncClient) -> Result<Self, FatalDataError> {
        let claim = client.registry().claim(S::NAME)?;

        let binding = Arc::new(Binding {
            name: S::NAME,
            route: client.route().to_string(),
            structure: S::structure(),
            requester: Arc::clone(client.requester()),
        });
        let inner = Arc::new(StructInner {
            binding: Arc::clone(&binding),
            socket: Arc::clone(client.socket()),
            registry: client.registry().clone(),
            claim,
            cache: Mutex::new(HashMap::new()),
            events: EventEmitter::new(),
            all_view: DataArr::default(),
            archived_view: DataArr::default(),
            push_listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        StructInner::attach(&inner);

        spawn_background(S::NAME, "connect", async move {
            if let Err(error) = binding.announce().await {
                warn!(schema = S::NAME, error = %error, "struct connect announcement failed");
            }
        });
        Ok(Self { inner })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        S::NAME
    }

    pub fn structure(&self) -> &Structure {
        &self.inner.binding.structure
    }

    /// Re-sends the structure announcement and waits for the store to accept it.
    pub async fn connect(&self) -> Result<(), StructError> {
        self.inner.binding.announce().await
    }

    /// Submits a new record. It reaches the cache through the `create` push event.
    pub async fn create(&self, fields: Row) -> Result<(), StructError> {
        self.inner.binding.structure.check(&fields)?;
        self.inner
            .binding
            .post("create", Value::Object(fields))
            .await
            .map(|_| ())
    }

    /// Serializes `record` to a row and submits it with [`Struct::create`].
    pub async fn create_from<T: Serialize>(&self, record: &T) -> Result<(), StructError> {
        let value = serde_json::to_value(record).map_err(|error| {
            StructError::Data(DataError::Decode {
                message: error.to_string(),
            })
        })?;
        let Value::Object(fields) = value else {
            return Err(ValidationError::Empty.into());
        };
        self.create(fields).await
    }

    /// Cached instance for `id`, or the store's row wrapped and cached.
    pub async fn from_id(&self, id: &str) -> Result<Data<S>, StructError> {
        if let Some(cached) = self.cached(id) {
            return Ok(cached);
        }
        let mut row = self.inner.binding.post_row("", json!({ "id": id })).await?;
        row.entry(GlobalField::Id.as_str())
            .or_insert_with(|| Value::String(id.to_string()));
        self.inner
            .intern(row)
            .ok_or_else(|| StructError::UnexpectedResponse {
                path: self.inner.binding.path(""),
                message: "row without id".to_string(),
            })
    }

    /// Live collection of non-archived records, returned before it is populated.
    ///
    /// Population runs on the ambient tokio runtime; without one the collection only
    /// receives records created after this call. Subscribe for the eventual contents.
    pub fn all(&self) -> DataArr<S> {
        let arr = DataArr::default();
        self.inner.track(&arr, None);

        let inner = Arc::clone(&self.inner);
        let target = arr.clone();
        spawn_background(S::NAME, "all", async move {
            if let Err(error) = inner.populate(&target, "all", json!({})).await {
                warn!(schema = S::NAME, error = %error, "struct collection population failed");
            }
        });
        arr
    }

    /// Same live collection as [`Struct::all`], returned once populated.
    pub async fn all_loaded(&self) -> Result<DataArr<S>, StructError> {
        let arr = DataArr::default();
        self.inner.track(&arr, None);
        self.inner.populate(&arr, "all", json!({})).await?;
        Ok(arr)
    }

    /// Archived records as of now. Unlike [`Struct::all`] the result does not track later
    /// events.
    pub async fn archived(&self) -> Result<Vec<Data<S>>, StructError> {
        let rows = self.inner.binding.post_rows("archived", json!({})).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| self.inner.intern(row))
            .collect())
    }

    /// Live collection of non-archived records whose `property` equals `value`.
    pub async fn from_property(
        &self,
        property: &str,
        value: Value,
    ) -> Result<DataArr<S>, StructError> {
        let arr = DataArr::default();
        self.inner
            .track(&arr, Some((property.to_string(), value.clone())));
        self.inner
            .populate(
                &arr,
                "from-property",
                json!({ "property": property, "value": value }),
            )
            .await?;
        Ok(arr)
    }

    pub fn validate(&self, candidate: &Row) -> bool {
        self.inner.binding.structure.validate(candidate)
    }

    pub fn check(&self, candidate: &Row) -> Result<(), ValidationError> {
        self.inner.binding.structure.check(candidate)
    }

    pub fn on(
        &self,
        event: StructEvent,
        callback: impl Fn(&Data<S>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.on(event, callback)
    }

    pub fn off(&self, event: StructEvent, id: Option<ListenerId>) -> usize {
        self.inner.events.off(&event, id)
    }

    pub fn cached(&self, id: &str) -> Option<Data<S>> {
        self.inner.lock_cache().get(id).cloned()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.lock_cache().len()
    }

    /// Drops `id` from the cache and the default views without telling the store.
    pub fn evict(&self, id: &str) -> Option<Data<S>> {
        let evicted = self.inner.lock_cache().remove(id)?;
        self.inner.all_view.remove(&evicted);
        self.inner.archived_view.remove(&evicted);
        Some(evicted)
    }

    /// Every cached, non-archived record.
    pub fn default_all(&self) -> DataArr<S> {
        self.inner.all_view.clone()
    }

    /// Every cached, archived record.
    pub fn default_archived(&self) -> DataArr<S> {
        self.inner.archived_view.clone()
    }

    /// Detaches push handlers, releases the name and clears the cache. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.detach();
        self.inner.events.destroy();
        self.inner.lock_cache().clear();
        debug!(schema = S::NAME, "struct closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl<S: Schema> Clone for Struct<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Schema> std::fmt::Debug for Struct<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Struct")
            .field("name", &S::NAME)
            .field("cached", &self.cache_len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<S: Schema> StructInner<S> {
    fn attach(inner: &Arc<Self>) {
        let handlers: [(&str, PushApply<S>); 8] = [
            ("create", Self::apply_create),
            ("update", Self::apply_update),
            ("delete", Self::apply_delete),
            ("archive", Self::apply_archive),
            ("restore", Self::apply_restore),
            ("unarchive", Self::apply_restore),
            ("restore-version", Self::apply_restore_version),
            ("delete-version", Self::apply_delete_version),
        ];

        let mut registered = Vec::with_capacity(handlers.len());
        for (event, apply) in handlers {
            let name = push_event_name(S::NAME, event);
            let weak = Arc::downgrade(inner);
            let id = inner.socket.on(
                name.as_str(),
                Arc::new(move |payload: &Value| {
                    if let Some(inner) = weak.upgrade() {
                        apply(&inner, payload);
                    }
                }),
            );
            registered.push((name, id));
        }
        *lock(&inner.push_listeners) = registered;
    }

    fn apply_create(&self, payload: &Value) {
        let Some(row) = payload_row(payload) else {
            debug!(schema = S::NAME, event = "create", "push payload is not a row");
            return;
        };
        let Some(id) = text_field(&row, GlobalField::Id.as_str()) else {
            debug!(schema = S::NAME, event = "create", "push payload without id");
            return;
        };

        let data = {
            let mut cache = self.lock_cache();
            if cache.contains_key(&id) {
                debug!(schema = S::NAME, id = %id, "duplicate create ignored");
                return;
            }
            let data = Data::new(Arc::clone(&self.binding), row);
            cache.insert(id, data.clone());
            data
        };
        self.place_in_default_view(&data);
        self.events.emit(&StructEvent::New, &data);
    }

    fn apply_update(&self, payload: &Value) {
        let Some(row) = payload_row(payload) else {
            debug!(schema = S::NAME, event = "update", "push payload is not a row");
            return;
        };
        let Some(data) = self.cached_for(&row_id(&row), "update") else {
            return;
        };
        data.set(&row);
        self.place_in_default_view(&data);
        self.events.emit(&StructEvent::Update, &data);
    }

    fn apply_delete(&self, payload: &Value) {
        let id = payload_id(payload);
        let removed = self.lock_cache().remove(&id);
        let Some(data) = removed else {
            debug!(schema = S::NAME, id = %id, event = "delete", "push event for uncached id");
            return;
        };
        self.all_view.remove(&data);
        self.archived_view.remove(&data);
        self.events.emit(&StructEvent::Delete, &data);
    }

    fn apply_archive(&self, payload: &Value) {
        let Some(data) = self.cached_for(&payload_id(payload), "archive") else {
            return;
        };
        data.set(&archived_patch(true));
        self.all_view.remove(&data);
        self.archived_view.add_unique(&data);
        self.events.emit(&StructEvent::Archive, &data);
    }

    fn apply_restore(&self, payload: &Value) {
        let Some(data) = self.cached_for(&payload_id(payload), "restore") else {
            return;
        };
        data.set(&archived_patch(false));
        self.archived_view.remove(&data);
        self.all_view.add_unique(&data);
        self.events.emit(&StructEvent::Restore, &data);
    }

    /// Cached records take the restored row, move to the default view matching its archive
    /// flag and raise `RestoreVersion`; unknown ids are cached silently, outside the views.
    fn apply_restore_version(&self, payload: &Value) {
        let Some(row) = payload_row(payload) else {
            debug!(schema = S::NAME, event = "restore-version", "push payload is not a row");
            return;
        };
        let id = row_id(&row);
        if id.is_empty() {
            debug!(schema = S::NAME, event = "restore-version", "push payload without id");
            return;
        }

        let cached = {
            let mut cache = self.lock_cache();
            match cache.get(&id) {
                Some(data) => Some(data.clone()),
                None => {
                    cache.insert(id, Data::new(Arc::clone(&self.binding), row.clone()));
                    None
                }
            }
        };
        if let Some(data) = cached {
            data.set(&row);
            self.place_in_default_view(&data);
            self.events.emit(&StructEvent::RestoreVersion, &data);
        }
    }

    /// Versions are never retained client-side, so there is nothing to drop.
    fn apply_delete_version(&self, payload: &Value) {
        debug!(
            schema = S::NAME,
            id = %payload_id(payload),
            event = "delete-version",
            "version deleted"
        );
    }

    fn cached_for(&self, id: &str, event: &'static str) -> Option<Data<S>> {
        let cached = self.lock_cache().get(id).cloned();
        if cached.is_none() {
            debug!(schema = S::NAME, id = %id, event, "push event for uncached id");
        }
        cached
    }

    /// Get-or-create for query responses: an id already cached keeps its instance.
    fn intern(&self, row: Row) -> Option<Data<S>> {
        let id = text_field(&row, GlobalField::Id.as_str())?;
        let (data, created) = {
            let mut cache = self.lock_cache();
            match cache.get(&id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let data = Data::new(Arc::clone(&self.binding), row);
                    cache.insert(id, data.clone());
                    (data, true)
                }
            }
        };
        if created {
            self.place_in_default_view(&data);
        }
        Some(data)
    }

    fn place_in_default_view(&self, data: &Data<S>) {
        if data.archived() {
            self.all_view.remove(data);
            self.archived_view.add_unique(data);
        } else {
            self.archived_view.remove(data);
            self.all_view.add_unique(data);
        }
    }

    async fn populate(
        &self,
        arr: &DataArr<S>,
        action: &str,
        body: Value,
    ) -> Result<(), StructError> {
        let rows = self.binding.post_rows(action, body).await?;
        let fetched = rows
            .into_iter()
            .filter_map(|row| self.intern(row))
            .filter(|data| !data.archived())
            .collect::<Vec<_>>();
        let added = arr.extend_unique(fetched);
        debug!(schema = S::NAME, action, added, "struct collection populated");
        Ok(())
    }

    /// Keeps `arr` in step with local events until its last subscriber leaves or it is
    /// dropped.
    fn track(self: &Arc<Self>, arr: &DataArr<S>, filter: PropertyFilter) {
        let registered: Arc<Mutex<Vec<(StructEvent, ListenerId)>>> = Arc::default();
        let target = arr.downgrade();
        let owner: Weak<Self> = Arc::downgrade(self);

        let mut ids = Vec::with_capacity(StructEvent::ALL.len());
        for event in StructEvent::ALL {
            let target = target.clone();
            let filter = filter.clone();
            let owner = Weak::clone(&owner);
            let registered = Arc::clone(&registered);
            let id = self.events.on(event, move |data: &Data<S>| {
                if let Some(arr) = target.upgrade() {
                    reconcile(&arr, data, event, filter.as_ref());
                } else {
                    release_tracking(&owner, &registered);
                }
            });
            ids.push((event, id));
        }
        *lock(&registered) = ids;

        arr.on_all_unsubscribe(move || release_tracking(&owner, &registered));
    }
}

impl<S> StructInner<S> {
    fn detach(&self) {
        let listeners = std::mem::take(&mut *lock(&self.push_listeners));
        for (event, id) in listeners {
            self.socket.off(event.as_str(), Some(id));
        }
        self.registry.release(&self.claim);
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, Data<S>>> {
        lock(&self.cache)
    }
}

impl<S> Drop for StructInner<S> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.detach();
        }
    }
}

fn reconcile<S>(
    arr: &DataArr<S>,
    data: &Data<S>,
    event: StructEvent,
    filter: Option<&(String, Value)>,
) {
    let id = data.id();
    if event == StructEvent::Delete {
        arr.remove_id(&id);
        return;
    }
    let matches_filter = filter.is_none_or(|(key, value)| data.get(key).as_ref() == Some(value));
    if !data.archived() && matches_filter {
        arr.add_unique(data);
    } else {
        arr.remove_id(&id);
    }
}

fn release_tracking<S>(
    owner: &Weak<StructInner<S>>,
    registered: &Mutex<Vec<(StructEvent, ListenerId)>>,
) {
    let ids = std::mem::take(&mut *lock(registered));
    let Some(owner) = owner.upgrade() else {
        return;
    };
    for (event, id) in ids {
        owner.events.off(&event, Some(id));
    }
}

fn spawn_background<F>(schema: &'static str, task: &'static str, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!(schema, task, "no tokio runtime; background struct task skipped"),
    }
}

fn payload_row(payload: &Value) -> Option<Row> {
    match payload {
        Value::Object(row) => Some(row.clone()),
        _ => None,
    }
}

fn row_id(row: &Row) -> String {
    text_field(row, GlobalField::Id.as_str()).unwrap_or_default()
}

/// Lifecycle events carry a bare id; `{ "id": … }` objects are accepted too.
fn payload_id(payload: &Value) -> String {
    match payload {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        Value::Object(row) => row_id(row),
        _ => String::new(),
    }
}

fn archived_patch(archived: bool) -> Row {
    let mut patch = Row::new();
    patch.insert(
        GlobalField::Archived.as_str().to_string(),
        Value::Bool(archived),
    );
    patch
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
