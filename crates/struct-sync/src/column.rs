//! Field kinds, their runtime type descriptors, and schema structures.
//!
//! `FieldKind::runtime_type` is the single place that maps a declared column kind onto the
//! JSON value shape records carry at runtime. Everything that validates rows goes through
//! it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Raw field snapshot of one record.
pub type Row = Map<String, Value>;

/// Declared kind of a schema column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Bigint,
    Text,
    Json,
    Boolean,
    Real,
    Numeric,
}

/// Runtime value shape a field kind maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Number,
    String,
    Object,
    Boolean,
    Unknown,
}

impl FieldKind {
    pub const ALL: [Self; 7] = [
        Self::Integer,
        Self::Bigint,
        Self::Text,
        Self::Json,
        Self::Boolean,
        Self::Real,
        Self::Numeric,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Bigint => "bigint",
            Self::Text => "text",
            Self::Json => "json",
            Self::Boolean => "boolean",
            Self::Real => "real",
            Self::Numeric => "numeric",
        }
    }

    #[must_use]
    pub fn runtime_type(self) -> RuntimeType {
        match self {
            Self::Integer | Self::Bigint | Self::Real | Self::Numeric => RuntimeType::Number,
            Self::Text => RuntimeType::String,
            Self::Json => RuntimeType::Object,
            Self::Boolean => RuntimeType::Boolean,
        }
    }

    #[must_use]
    pub fn validate(self, value: &Value) -> bool {
        self.runtime_type().matches(value)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown field kind: {raw}"))
    }
}

impl RuntimeType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
            Self::Boolean => "boolean",
            Self::Unknown => "unknown",
        }
    }

    /// JSON arrays count as objects. `Unknown` matches nothing.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Object => value.is_object() || value.is_array(),
            Self::Boolean => value.is_boolean(),
            Self::Unknown => false,
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime type for a raw kind tag; unrecognised tags map to `Unknown`.
#[must_use]
pub fn runtime_type_of(tag: &str) -> RuntimeType {
    tag.parse::<FieldKind>()
        .map_or(RuntimeType::Unknown, FieldKind::runtime_type)
}

/// Fields every record carries, plus the optional ones a structure may opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalField {
    Id,
    Created,
    Updated,
    Archived,
    Attributes,
    Universes,
    Lifetime,
}

impl GlobalField {
    pub const ALWAYS: [Self; 4] = [Self::Id, Self::Created, Self::Updated, Self::Archived];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Archived => "archived",
            Self::Attributes => "attributes",
            Self::Universes => "universes",
            Self::Lifetime => "lifetime",
        }
    }

    #[must_use]
    pub fn kind(self) -> FieldKind {
        match self {
            Self::Archived => FieldKind::Boolean,
            Self::Lifetime => FieldKind::Integer,
            _ => FieldKind::Text,
        }
    }

    #[must_use]
    pub fn is_optional(self) -> bool {
        matches!(self, Self::Attributes | Self::Universes | Self::Lifetime)
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        [
            Self::Id,
            Self::Created,
            Self::Updated,
            Self::Archived,
            Self::Attributes,
            Self::Universes,
            Self::Lifetime,
        ]
        .into_iter()
        .find(|field| field.as_str() == name)
    }
}

/// Column map of a schema: field name to kind, plus the optional global fields it carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Structure {
    columns: BTreeMap<String, FieldKind>,
    carried: Vec<GlobalField>,
}

impl Structure {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.columns.insert(name.into(), kind);
        self
    }

    /// Opts into an optional global field. Mandatory globals are ignored here; they are
    /// server-assigned and never part of a submitted row.
    #[must_use]
    pub fn carries(mut self, field: GlobalField) -> Self {
        if field.is_optional() && !self.carried.contains(&field) {
            self.carried.push(field);
        }
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.columns
            .iter()
            .map(|(name, kind)| (name.as_str(), *kind))
    }

    #[must_use]
    pub fn carried(&self) -> &[GlobalField] {
        &self.carried
    }

    /// Kind of a submittable field: a column or a carried optional global.
    #[must_use]
    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        if let Some(kind) = self.columns.get(field) {
            return Some(*kind);
        }
        GlobalField::parse(field)
            .filter(|global| self.carried.contains(global))
            .map(GlobalField::kind)
    }

    pub fn check(&self, candidate: &Row) -> Result<(), ValidationError> {
        if candidate.is_empty() {
            return Err(ValidationError::Empty);
        }
        for (field, value) in candidate {
            let Some(kind) = self.kind_of(field) else {
                return Err(ValidationError::UnknownField {
                    field: field.clone(),
                });
            };
            if !kind.validate(value) {
                return Err(ValidationError::TypeMismatch {
                    field: field.clone(),
                    expected: kind.runtime_type(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn validate(&self, candidate: &Row) -> bool {
        self.check(candidate).is_ok()
    }

    /// Column map as sent in the `/connect` announcement.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (name, kind) in &self.columns {
            map.insert(name.clone(), Value::String(kind.as_str().to_string()));
        }
        for global in &self.carried {
            map.insert(
                global.as_str().to_string(),
                Value::String(global.kind().as_str().to_string()),
            );
        }
        Value::Object(map)
    }
}

/// A declared record type. `NAME` is the process-wide key of the struct that syncs it.
pub trait Schema: Send + Sync + 'static {
    const NAME: &'static str;

    fn structure() -> Structure;
}
