//! Error taxonomy for records, structs and transports.

use reqwest::StatusCode;
use thiserror::Error;

use crate::column::RuntimeType;

/// Recoverable read failure on a single record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// The field is not present in the snapshot, either because the viewer may not read it
    /// or because the row was loaded as a partial projection.
    #[error("data_field_unavailable:{field}")]
    FieldUnavailable { field: String },
    #[error("data_decode_failed:{message}")]
    Decode { message: String },
}

/// Programmer or startup error. Callers are expected to abort rather than continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalDataError {
    #[error("struct_duplicate_name:{name}")]
    DuplicateStruct { name: String },
}

/// Shape or type failure of a candidate row against a structure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("struct_validation_empty")]
    Empty,
    #[error("struct_validation_unknown_field:{field}")]
    UnknownField { field: String },
    #[error("struct_validation_type_mismatch:{field}:expected_{expected}")]
    TypeMismatch {
        field: String,
        expected: RuntimeType,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("struct_transport_base_url_missing")]
    BaseUrlMissing,
    #[error("struct_transport_base_url_invalid:{raw}")]
    InvalidBaseUrl { raw: String },
    #[error("struct_transport_invalid_path")]
    InvalidPath,
    #[error("struct_transport_request_failed:{message}")]
    Request { message: String },
    #[error("struct_transport_read_failed:{message}")]
    Read { message: String },
    #[error("struct_transport_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("struct_transport_decode_failed:{message}")]
    Decode { message: String },
    #[error("struct_transport_rejected:{message}")]
    Rejected { message: String },
    #[error("struct_transport_socket:{message}")]
    Socket { message: String },
}

/// Failure of a remote-touching struct or record operation.
#[derive(Debug, Error)]
pub enum StructError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("struct_unexpected_response:{path}:{message}")]
    UnexpectedResponse { path: String, message: String },
    #[error("struct_undo_mismatch:expected_{expected}:got_{actual}")]
    UndoMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("struct_sync_base_url_missing")]
    BaseUrlMissing,
    #[error("struct_sync_base_url_invalid:{raw}")]
    InvalidBaseUrl { raw: String },
    #[error("struct_sync_invalid_number:{key}:{raw}")]
    InvalidNumber { key: String, raw: String },
}
