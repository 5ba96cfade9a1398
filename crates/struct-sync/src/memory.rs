//! In-process authoritative store speaking the struct route surface.
//!
//! Every successful mutation answers the request first and then broadcasts the matching
//! push event on the remote's [`LocalSocket`], after its own lock is released, so push
//! handlers may call back into the remote.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::column::{GlobalField, Row};
use crate::error::TransportError;
use crate::transport::{LocalSocket, Requester, push_event_name};
use crate::version::{VH_CREATED, VH_ID};

type Gate = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Store-side table for one schema.
#[derive(Debug, Default)]
struct Table {
    structure: Option<Row>,
    rows: Vec<Row>,
    history: Vec<Row>,
    readable: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct RemoteState {
    tables: HashMap<String, Table>,
    next_version: u64,
}

/// [`Requester`] backed by in-memory tables.
pub struct MemoryRemote {
    socket: Arc<LocalSocket>,
    state: Mutex<RemoteState>,
    gate: Option<Gate>,
}

type Outcome = (Value, Vec<(String, Value)>);

impl MemoryRemote {
    #[must_use]
    pub fn new(socket: Arc<LocalSocket>) -> Self {
        Self {
            socket,
            state: Mutex::new(RemoteState::default()),
            gate: None,
        }
    }

    /// Allow/deny decision per `(schema, action)`. Denied requests fail with
    /// [`TransportError::Rejected`].
    #[must_use]
    pub fn with_gate(mut self, gate: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        self.gate = Some(Arc::new(gate));
        self
    }

    /// Restricts `all` and `from-property` rows to the global fields plus `fields`.
    pub fn set_readable(&self, schema: &str, fields: &[&str]) {
        self.lock()
            .tables
            .entry(schema.to_string())
            .or_default()
            .readable = Some(fields.iter().map(|field| (*field).to_string()).collect());
    }

    pub fn socket(&self) -> &Arc<LocalSocket> {
        &self.socket
    }

    /// Stored rows in insertion order, archived ones included.
    pub fn rows(&self, schema: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(schema)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Column map the schema announced through `connect`.
    pub fn structure(&self, schema: &str) -> Option<Row> {
        self.lock()
            .tables
            .get(schema)
            .and_then(|table| table.structure.clone())
    }

    /// Writes a row directly, without a push event.
    pub fn seed(&self, schema: &str, row: Row) -> String {
        let mut state = self.lock();
        let row = stamp_new(row);
        let id = id_of(&row);
        state
            .tables
            .entry(schema.to_string())
            .or_default()
            .rows
            .push(row);
        id
    }

    fn handle(&self, schema: &str, action: &str, body: Value) -> Result<Outcome, TransportError> {
        let mut state = self.lock();
        state.next_version += 1;
        let version = state.next_version.to_string();
        let table = state.tables.entry(schema.to_string()).or_default();

        match action {
            "connect" => {
                let structure = body
                    .get("structure")
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or_else(|| bad_request("connect requires a structure"))?;
                table.structure = Some(structure);
                Ok((Value::Null, Vec::new()))
            }
            "create" => {
                let fields = object(body)?;
                check_columns(table, &fields)?;
                let row = stamp_new(fields);
                table.rows.push(row.clone());
                Ok((Value::Null, vec![push(schema, "create", Value::Object(row))]))
            }
            "" => {
                let id = body_id(&body)?;
                let row = find(table, &id)?;
                Ok((Value::Object(row.clone()), Vec::new()))
            }
            "all" => {
                let rows = visible(table, |row| !is_archived(row));
                Ok((Value::Array(rows), Vec::new()))
            }
            "archived" => {
                let rows = table
                    .rows
                    .iter()
                    .filter(|row| is_archived(row))
                    .cloned()
                    .map(Value::Object)
                    .collect();
                Ok((Value::Array(rows), Vec::new()))
            }
            "from-property" => {
                let property = body
                    .get("property")
                    .and_then(Value::as_str)
                    .ok_or_else(|| bad_request("from-property requires a property"))?
                    .to_string();
                let value = body.get("value").cloned().unwrap_or(Value::Null);
                let rows = visible(table, |row| {
                    !is_archived(row) && row.get(&property) == Some(&value)
                });
                Ok((Value::Array(rows), Vec::new()))
            }
            "update" => {
                let mut patch = object(body)?;
                let id = patch
                    .remove(GlobalField::Id.as_str())
                    .and_then(|value| value.as_str().map(str::to_string))
                    .ok_or_else(|| bad_request("update requires an id"))?;
                check_columns(table, &patch)?;
                let index = position(table, &id)?;
                table.history.push(snapshot_version(&table.rows[index], version));
                let row = &mut table.rows[index];
                for (field, value) in patch {
                    row.insert(field, value);
                }
                touch(row);
                let row = row.clone();
                Ok((Value::Null, vec![push(schema, "update", Value::Object(row))]))
            }
            "delete" => {
                let id = body_id(&body)?;
                let index = position(table, &id)?;
                table.rows.remove(index);
                Ok((Value::Null, vec![push(schema, "delete", Value::String(id))]))
            }
            "archive" | "unarchive" => {
                let archived = action == "archive";
                let id = body_id(&body)?;
                let index = position(table, &id)?;
                let row = &mut table.rows[index];
                row.insert(
                    GlobalField::Archived.as_str().to_string(),
                    Value::Bool(archived),
                );
                touch(row);
                let event = if archived { "archive" } else { "restore" };
                Ok((Value::Null, vec![push(schema, event, Value::String(id))]))
            }
            "version-history" => {
                let id = body_id(&body)?;
                let versions = table
                    .history
                    .iter()
                    .filter(|version| id_of(version) == id)
                    .cloned()
                    .map(Value::Object)
                    .collect();
                Ok((Value::Array(versions), Vec::new()))
            }
            "restore-version" => {
                let id = body_id(&body)?;
                let vh_id = version_id(&body)?;
                let restored = table
                    .history
                    .iter()
                    .find(|entry| id_of(entry) == id && id_of_version(entry) == vh_id)
                    .cloned()
                    .ok_or_else(|| not_found(&format!("{id}@{vh_id}")))?;

                let mut row = restored;
                row.remove(VH_ID);
                row.remove(VH_CREATED);
                touch(&mut row);
                match table.rows.iter().position(|existing| id_of(existing) == id) {
                    Some(index) => {
                        let current = snapshot_version(&table.rows[index], version);
                        table.history.push(current);
                        table.rows[index] = row.clone();
                    }
                    None => table.rows.push(row.clone()),
                }
                Ok((
                    Value::Null,
                    vec![push(schema, "restore-version", Value::Object(row))],
                ))
            }
            "delete-version" => {
                let id = body_id(&body)?;
                let vh_id = version_id(&body)?;
                let before = table.history.len();
                table
                    .history
                    .retain(|entry| !(id_of(entry) == id && id_of_version(entry) == vh_id));
                if table.history.len() == before {
                    return Err(not_found(&format!("{id}@{vh_id}")));
                }
                Ok((
                    Value::Null,
                    vec![push(schema, "delete-version", Value::String(vh_id))],
                ))
            }
            other => Err(TransportError::Rejected {
                message: format!("unknown_action:{other}"),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Requester for MemoryRemote {
    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        let (schema, action) = split_path(path).ok_or(TransportError::InvalidPath)?;
        if let Some(gate) = &self.gate
            && !gate(schema, action)
        {
            return Err(TransportError::Rejected {
                message: format!("permission_denied:{schema}/{action}"),
            });
        }

        let (response, pushes) = self.handle(schema, action, body)?;
        for (event, payload) in pushes {
            self.socket.dispatch(event.as_str(), &payload);
        }
        Ok(response)
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        let tables = state
            .tables
            .iter()
            .map(|(name, table)| (name.clone(), table.rows.len()))
            .collect::<Vec<_>>();
        f.debug_struct("MemoryRemote")
            .field("tables", &tables)
            .field("gated", &self.gate.is_some())
            .finish()
    }
}

/// `{route}/{schema}/{action}` to `(schema, action)`. The action may be empty.
fn split_path(path: &str) -> Option<(&str, &str)> {
    let mut parts = path.trim().trim_start_matches('/').rsplitn(3, '/');
    let action = parts.next()?;
    let schema = parts.next().filter(|schema| !schema.is_empty())?;
    Some((schema, action))
}

fn push(schema: &str, event: &str, payload: Value) -> (String, Value) {
    (push_event_name(schema, event), payload)
}

fn stamp_new(mut fields: Row) -> Row {
    for global in GlobalField::ALWAYS {
        fields.remove(global.as_str());
    }
    let now = Utc::now().to_rfc3339();
    let mut row = Row::new();
    row.insert(
        GlobalField::Id.as_str().to_string(),
        Value::String(Uuid::new_v4().to_string()),
    );
    row.insert(GlobalField::Created.as_str().to_string(), json!(now));
    row.insert(GlobalField::Updated.as_str().to_string(), json!(now));
    row.insert(GlobalField::Archived.as_str().to_string(), Value::Bool(false));
    row.extend(fields);
    row
}

fn touch(row: &mut Row) {
    row.insert(
        GlobalField::Updated.as_str().to_string(),
        json!(Utc::now().to_rfc3339()),
    );
}

fn snapshot_version(row: &Row, vh_id: String) -> Row {
    let mut version = row.clone();
    version.insert(VH_ID.to_string(), Value::String(vh_id));
    version.insert(VH_CREATED.to_string(), json!(Utc::now().to_rfc3339()));
    version
}

fn visible(table: &Table, keep: impl Fn(&Row) -> bool) -> Vec<Value> {
    table
        .rows
        .iter()
        .filter(|row| keep(row))
        .map(|row| match &table.readable {
            Some(readable) => Value::Object(
                row.iter()
                    .filter(|(field, _)| {
                        GlobalField::parse(field).is_some() || readable.contains(field)
                    })
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect(),
            ),
            None => Value::Object(row.clone()),
        })
        .collect()
}

fn check_columns(table: &Table, fields: &Row) -> Result<(), TransportError> {
    let Some(structure) = &table.structure else {
        return Ok(());
    };
    match fields.keys().find(|field| !structure.contains_key(*field)) {
        Some(field) => Err(bad_request(&format!("unknown column {field}"))),
        None => Ok(()),
    }
}

fn object(body: Value) -> Result<Row, TransportError> {
    match body {
        Value::Object(row) => Ok(row),
        _ => Err(bad_request("body must be an object")),
    }
}

fn body_id(body: &Value) -> Result<String, TransportError> {
    body.get(GlobalField::Id.as_str())
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| bad_request("request requires an id"))
}

fn version_id(body: &Value) -> Result<String, TransportError> {
    match body.get(VH_ID) {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(bad_request("request requires a vhId")),
    }
}

fn id_of(row: &Row) -> String {
    row.get(GlobalField::Id.as_str())
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn id_of_version(row: &Row) -> String {
    row.get(VH_ID)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn is_archived(row: &Row) -> bool {
    matches!(row.get(GlobalField::Archived.as_str()), Some(Value::Bool(true)))
}

fn find<'a>(table: &'a Table, id: &str) -> Result<&'a Row, TransportError> {
    table
        .rows
        .iter()
        .find(|row| id_of(row) == id)
        .ok_or_else(|| not_found(id))
}

fn position(table: &Table, id: &str) -> Result<usize, TransportError> {
    table
        .rows
        .iter()
        .position(|row| id_of(row) == id)
        .ok_or_else(|| not_found(id))
}

fn not_found(id: &str) -> TransportError {
    TransportError::Rejected {
        message: format!("not_found:{id}"),
    }
}

fn bad_request(message: &str) -> TransportError {
    TransportError::Rejected {
        message: format!("bad_request:{message}"),
    }
}
