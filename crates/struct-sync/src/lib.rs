//! Typed record cache kept in step with a remote authoritative store.
//!
//! A [`Struct`] per schema owns the identity map for that schema. Queries and mutations go
//! out through a [`Requester`]; the store's confirmations come back as push events through
//! a [`Socket`] and are the only path that changes cached records.

mod binding;

pub mod client;
pub mod column;
pub mod config;
pub mod data;
pub mod data_arr;
pub mod emitter;
pub mod error;
pub mod http;
pub mod memory;
pub mod registry;
pub mod structs;
pub mod transport;
pub mod version;
pub mod ws;

pub use client::SyncClient;
pub use column::{FieldKind, GlobalField, Row, RuntimeType, Schema, Structure, runtime_type_of};
pub use config::SyncConfig;
pub use data::{Data, PullView, UndoToken};
pub use data_arr::DataArr;
pub use emitter::{EventEmitter, ListenerId, Subscription};
pub use error::{
    ConfigError, DataError, FatalDataError, StructError, TransportError, ValidationError,
};
pub use http::HttpRequester;
pub use memory::MemoryRemote;
pub use registry::{ClaimToken, StructRegistry};
pub use structs::{Struct, StructEvent};
pub use transport::{LocalSocket, PushHandler, Requester, Socket, push_event_name};
pub use version::DataVersion;
pub use ws::{PushFrame, WsSocket};
