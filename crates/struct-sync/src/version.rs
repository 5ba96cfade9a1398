use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::binding::Binding;
use crate::column::{GlobalField, Row, Schema};
use crate::data::{decode_row, flag, parse_timestamp, text_field};
use crate::error::{DataError, StructError};

pub const VH_ID: &str = "vhId";
pub const VH_CREATED: &str = "vhCreated";

/// One immutable row of a record's version history. Not cached and not observable.
pub struct DataVersion<S> {
    binding: Arc<Binding>,
    row: Row,
    _schema: PhantomData<fn() -> S>,
}

impl<S> DataVersion<S> {
    pub(crate) fn new(binding: Arc<Binding>, row: Row) -> Self {
        Self {
            binding,
            row,
            _schema: PhantomData,
        }
    }

    pub fn vh_id(&self) -> String {
        text_field(&self.row, VH_ID).unwrap_or_default()
    }

    pub fn vh_created(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.row.get(VH_CREATED))
    }

    /// Id of the record this revision belongs to.
    pub fn id(&self) -> String {
        text_field(&self.row, GlobalField::Id.as_str()).unwrap_or_default()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.row.get(GlobalField::Created.as_str()))
    }

    pub fn updated(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.row.get(GlobalField::Updated.as_str()))
    }

    pub fn archived(&self) -> bool {
        flag(self.row.get(GlobalField::Archived.as_str()))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.row.get(field)
    }

    pub fn snapshot(&self) -> &Row {
        &self.row
    }

    /// Asks the store to reinstate this revision. The store answers with a
    /// `restore-version` push event carrying the restored row.
    pub async fn restore(&self) -> Result<(), StructError> {
        self.binding
            .post("restore-version", self.key())
            .await
            .map(|_| ())
    }

    /// Asks the store to drop this revision from the history.
    pub async fn delete(&self) -> Result<(), StructError> {
        self.binding
            .post("delete-version", self.key())
            .await
            .map(|_| ())
    }

    /// `vhId` goes back exactly as the store sent it.
    fn key(&self) -> Value {
        let vh_id = self.row.get(VH_ID).cloned().unwrap_or(Value::Null);
        json!({ "id": self.id(), VH_ID: vh_id })
    }
}

impl<S> DataVersion<S>
where
    S: Schema + DeserializeOwned,
{
    /// Decodes the revision's snapshot; history columns are ignored unless `S` names them.
    pub fn record(&self) -> Result<S, DataError> {
        decode_row(self.row.clone())
    }
}

impl<S> Clone for DataVersion<S> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.binding), self.row.clone())
    }
}

impl<S> fmt::Debug for DataVersion<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataVersion")
            .field("schema", &self.binding.name)
            .field("row", &self.row)
            .finish()
    }
}
