//! A single synchronized record and its projections.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::binding::Binding;
use crate::column::{GlobalField, Row, Schema};
use crate::emitter::{EventEmitter, Subscription};
use crate::error::{DataError, StructError};
use crate::version::DataVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DataEvent {
    Changed,
}

/// Shared handle to one record. Clones refer to the same instance; the owning struct keeps
/// at most one instance per id, so [`Data::ptr_eq`] is the identity check.
pub struct Data<S> {
    inner: Arc<DataInner<S>>,
}

struct DataInner<S> {
    binding: Arc<Binding>,
    snapshot: Mutex<Row>,
    subscribers: EventEmitter<DataEvent, Row>,
    _schema: PhantomData<fn() -> S>,
}

/// Serializable record of the values an update replaced, used to submit the reverse update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoToken {
    pub schema: String,
    pub id: String,
    pub previous: Row,
}

impl<S> Clone for Data<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Data<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("schema", &self.inner.binding.name)
            .field("snapshot", &*self.lock_snapshot())
            .finish()
    }
}

impl<S> Data<S> {
    /// Wraps a row. Never touches a cache; insertion is the owning struct's job.
    pub(crate) fn new(binding: Arc<Binding>, row: Row) -> Self {
        Self {
            inner: Arc::new(DataInner {
                binding,
                snapshot: Mutex::new(row),
                subscribers: EventEmitter::new(),
                _schema: PhantomData,
            }),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn schema_name(&self) -> &'static str {
        self.inner.binding.name
    }

    /// Empty when the snapshot carries no id.
    pub fn id(&self) -> String {
        text_field(&self.lock_snapshot(), GlobalField::Id.as_str()).unwrap_or_default()
    }

    /// `None` is the invalid-date sentinel: missing or unparseable text.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.lock_snapshot().get(GlobalField::Created.as_str()))
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.lock_snapshot().get(GlobalField::Updated.as_str()))
    }

    pub fn archived(&self) -> bool {
        flag(self.lock_snapshot().get(GlobalField::Archived.as_str()))
    }

    pub fn attributes(&self) -> Vec<String> {
        string_list(self.lock_snapshot().get(GlobalField::Attributes.as_str()))
    }

    pub fn universes(&self) -> Vec<String> {
        string_list(self.lock_snapshot().get(GlobalField::Universes.as_str()))
    }

    /// Time-to-live in milliseconds for ephemeral schemas.
    pub fn lifetime(&self) -> Option<i64> {
        let snapshot = self.lock_snapshot();
        match snapshot.get(GlobalField::Lifetime.as_str())? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// `created + lifetime`; `None` without a positive lifetime or a valid creation time.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lifetime = self.lifetime().filter(|lifetime| *lifetime > 0)?;
        self.created()?
            .checked_add_signed(Duration::milliseconds(lifetime))
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.lock_snapshot().get(field).cloned()
    }

    pub fn snapshot(&self) -> Row {
        self.lock_snapshot().clone()
    }

    /// Merges server-confirmed fields and notifies subscribers with the merged snapshot.
    pub(crate) fn set(&self, partial: &Row) {
        let merged = {
            let mut snapshot = self.lock_snapshot();
            for (field, value) in partial {
                snapshot.insert(field.clone(), value.clone());
            }
            snapshot.clone()
        };
        self.inner.subscribers.emit(&DataEvent::Changed, &merged);
    }

    /// Registers a change callback. It is not invoked with the current value on registration.
    pub fn subscribe(&self, callback: impl Fn(&Row) + Send + Sync + 'static) -> Subscription
    where
        S: 'static,
    {
        let id = self.inner.subscribers.on(DataEvent::Changed, callback);
        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.off(&DataEvent::Changed, Some(id));
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.listener_count(&DataEvent::Changed)
    }

    /// Submits the patch `mutator` derives from the current snapshot. The local snapshot is
    /// left alone; the confirmed state arrives through the struct's `update` push event.
    pub async fn update(
        &self,
        mutator: impl FnOnce(&Row) -> Row,
    ) -> Result<UndoToken, StructError> {
        let current = self.snapshot();
        let patch = mutator(&current);
        self.inner.binding.structure.check(&patch)?;

        let id = text_field(&current, GlobalField::Id.as_str()).unwrap_or_default();
        let previous = patch
            .keys()
            .filter_map(|field| {
                current
                    .get(field)
                    .map(|value| (field.clone(), value.clone()))
            })
            .collect::<Row>();

        let mut body = patch;
        body.insert(GlobalField::Id.as_str().to_string(), json!(id));
        self.inner.binding.post("update", Value::Object(body)).await?;

        Ok(UndoToken {
            schema: self.inner.binding.name.to_string(),
            id,
            previous,
        })
    }

    /// Submits the values `token` captured as a new update.
    pub async fn undo(&self, token: &UndoToken) -> Result<UndoToken, StructError> {
        let expected = format!("{}/{}", self.inner.binding.name, self.id());
        let actual = format!("{}/{}", token.schema, token.id);
        if expected != actual {
            return Err(StructError::UndoMismatch { expected, actual });
        }
        let previous = token.previous.clone();
        self.update(move |_| previous).await
    }

    /// Requests deletion. Cache removal happens when the `delete` push event arrives.
    pub async fn delete(&self) -> Result<(), StructError> {
        let body = Value::Object(self.snapshot());
        self.inner.binding.post("delete", body).await.map(|_| ())
    }

    pub async fn set_archive(&self, archived: bool) -> Result<(), StructError> {
        let action = if archived { "archive" } else { "unarchive" };
        let body = Value::Object(self.snapshot());
        self.inner.binding.post(action, body).await.map(|_| ())
    }

    pub async fn version_history(&self) -> Result<Vec<DataVersion<S>>, StructError> {
        let rows = self
            .inner
            .binding
            .post_rows("version-history", json!({ "id": self.id() }))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| DataVersion::new(Arc::clone(&self.inner.binding), row))
            .collect())
    }

    /// Live read-only projection onto `fields`. Fails when any of them is absent from the
    /// snapshot, which covers both "not readable by this viewer" and "not loaded".
    pub fn pull(&self, fields: &[&str]) -> Result<PullView<S>, DataError> {
        {
            let snapshot = self.lock_snapshot();
            if let Some(missing) = fields.iter().find(|field| !snapshot.contains_key(**field)) {
                return Err(DataError::FieldUnavailable {
                    field: (*missing).to_string(),
                });
            }
        }
        Ok(PullView {
            data: self.clone(),
            fields: fields.iter().map(|field| (*field).to_string()).collect(),
        })
    }

    fn lock_snapshot(&self) -> MutexGuard<'_, Row> {
        self.inner
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Data<S>
where
    S: Schema + DeserializeOwned,
{
    /// Decodes the snapshot into the schema's record type.
    pub fn record(&self) -> Result<S, DataError> {
        decode_row(self.snapshot())
    }
}

/// Projection of a record onto a fixed set of fields.
pub struct PullView<S> {
    data: Data<S>,
    fields: Vec<String>,
}

impl<S> PullView<S> {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn source(&self) -> &Data<S> {
        &self.data
    }

    pub fn get(&self) -> Row {
        project(&self.data.lock_snapshot(), &self.fields)
    }

    pub fn subscribe(&self, callback: impl Fn(&Row) + Send + Sync + 'static) -> Subscription
    where
        S: 'static,
    {
        let fields = self.fields.clone();
        self.data
            .subscribe(move |snapshot| callback(&project(snapshot, &fields)))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DataError> {
        decode_row(self.get())
    }
}

impl<S> fmt::Debug for PullView<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullView")
            .field("fields", &self.fields)
            .field("values", &self.get())
            .finish()
    }
}

fn project(snapshot: &Row, fields: &[String]) -> Row {
    fields
        .iter()
        .filter_map(|field| {
            snapshot
                .get(field)
                .map(|value| (field.clone(), value.clone()))
        })
        .collect()
}

pub(crate) fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, DataError> {
    serde_json::from_value(Value::Object(row)).map_err(|error| DataError::Decode {
        message: error.to_string(),
    })
}

pub(crate) fn text_field(row: &Row, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and epoch milliseconds as text or number.
pub(crate) fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
                return Some(naive.and_utc());
            }
            text.parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis)
        }
        Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

pub(crate) fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_i64().is_some_and(|raw| raw != 0),
        Some(Value::String(text)) => matches!(text.trim(), "true" | "1"),
        _ => false,
    }
}

/// Tag and universe lists travel as serialized JSON text; arrays are accepted as-is.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let parsed = match value {
        Some(Value::String(text)) => serde_json::from_str::<Value>(text).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    match parsed {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
