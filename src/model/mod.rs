//! Thin domain-model contracts consumed by the dispatch pipeline.

pub mod error;
pub mod event;
pub mod identifiable;
pub mod identity;
pub mod request;
pub mod response;

pub use error::{ApiError, ERROR_SUBJECT};
pub use event::{Event, EventKind, Publication};
pub use identifiable::{Identifiable, ModelManager, Output, UnmarshalError, Unmarshaller};
pub use identity::{Identity, Operation, RelationshipsRegistry};
pub use request::{Encoding, EncodingError, Headers, Request, TlsState};
pub use response::Response;
