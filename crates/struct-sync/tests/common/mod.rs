#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use struct_sync::{
    FieldKind, LocalSocket, Requester, Row, Schema, StructRegistry, Structure, SyncClient,
    TransportError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub age: i64,
}

impl Schema for Person {
    const NAME: &'static str = "Person";

    fn structure() -> Structure {
        Structure::new()
            .column("name", FieldKind::Text)
            .column("age", FieldKind::Integer)
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        other => panic!("expected an object, got {other}"),
    }
}

/// Full row the store would push for a freshly created person.
pub fn person_row(id: &str, name: &str, age: i64) -> Value {
    serde_json::json!({
        "id": id,
        "created": "2024-03-01T10:00:00Z",
        "updated": "2024-03-01T10:00:00Z",
        "archived": false,
        "name": name,
        "age": age,
    })
}

/// Requester that records every call and answers from canned responses keyed by path.
#[derive(Default)]
pub struct RecordingRequester {
    calls: Mutex<Vec<(String, Value)>>,
    responses: Mutex<HashMap<String, Result<Value, String>>>,
}

impl RecordingRequester {
    pub fn respond(&self, path: &str, value: Value) {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(path.to_string(), Ok(value));
    }

    pub fn reject(&self, path: &str, message: &str) {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(path.to_string(), Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Calls to `path`, in order.
    pub fn bodies(&self, path: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(called, _)| called == path)
            .map(|(_, body)| body)
            .collect()
    }
}

#[async_trait]
impl Requester for RecordingRequester {
    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((path.to_string(), body));
        let response = self
            .responses
            .lock()
            .expect("responses lock")
            .get(path)
            .cloned();
        match response {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(TransportError::Rejected { message }),
            None => Ok(Value::Null),
        }
    }
}

/// Requester whose calls never complete.
#[derive(Default)]
pub struct StalledRequester {
    pub attempts: Mutex<Vec<String>>,
}

#[async_trait]
impl Requester for StalledRequester {
    async fn post(&self, path: &str, _body: Value) -> Result<Value, TransportError> {
        self.attempts
            .lock()
            .expect("attempts lock")
            .push(path.to_string());
        std::future::pending().await
    }
}

/// Client over `requester` and a fresh local socket, with its own name registry.
pub fn client(requester: Arc<dyn Requester>) -> (SyncClient, Arc<LocalSocket>) {
    let socket = Arc::new(LocalSocket::new());
    let client = SyncClient::new(requester, socket.clone()).with_registry(StructRegistry::new());
    (client, socket)
}

/// Polls `condition` on the current runtime until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
