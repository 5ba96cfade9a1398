use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::column::{Row, Structure};
use crate::error::StructError;
use crate::transport::Requester;

/// Schema and transport shared by a struct and every record and version it hands out.
pub(crate) struct Binding {
    pub(crate) name: &'static str,
    pub(crate) route: String,
    pub(crate) structure: Structure,
    pub(crate) requester: Arc<dyn Requester>,
}

impl Binding {
    pub(crate) fn path(&self, action: &str) -> String {
        format!("{}/{}/{}", self.route, self.name, action)
    }

    pub(crate) async fn post(&self, action: &str, body: Value) -> Result<Value, StructError> {
        let path = self.path(action);
        tracing::trace!(schema = self.name, path = %path, "struct request");
        self.requester
            .post(path.as_str(), body)
            .await
            .map_err(StructError::from)
    }

    pub(crate) async fn post_row(&self, action: &str, body: Value) -> Result<Row, StructError> {
        match self.post(action, body).await? {
            Value::Object(row) => Ok(row),
            other => Err(self.unexpected(action, &other, "expected an object row")),
        }
    }

    pub(crate) async fn post_rows(
        &self,
        action: &str,
        body: Value,
    ) -> Result<Vec<Row>, StructError> {
        let response = self.post(action, body).await?;
        let Value::Array(items) = response else {
            return Err(self.unexpected(action, &response, "expected an array of rows"));
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(self.unexpected(action, &other, "expected an object row")),
            })
            .collect()
    }

    pub(crate) async fn announce(&self) -> Result<(), StructError> {
        self.post("connect", json!({ "structure": self.structure.to_value() }))
            .await
            .map(|_| ())
    }

    fn unexpected(&self, action: &str, value: &Value, message: &str) -> StructError {
        StructError::UnexpectedResponse {
            path: self.path(action),
            message: format!("{message}, got {}", value_kind(value)),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
