//! API requests and content encoding negotiation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Identity, Operation};

/// Body encoding negotiated from request headers.
///
/// JSON is the default; msgpack is selected with `Accept:
/// application/msgpack`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Json,
    Msgpack,
}

/// Failure to encode or decode a wire payload.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("msgpack encode: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),
}

impl Encoding {
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(v) if v.contains("application/msgpack") => Encoding::Msgpack,
            _ => Encoding::Json,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Json => "application/json",
            Encoding::Msgpack => "application/msgpack",
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, EncodingError> {
        match self {
            Encoding::Json => Ok(serde_json::to_vec(value)?),
            Encoding::Msgpack => Ok(rmp_serde::to_vec_named(value)?),
        }
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self, data: &[u8]) -> Result<T, EncodingError> {
        match self {
            Encoding::Json => Ok(serde_json::from_slice(data)?),
            Encoding::Msgpack => Ok(rmp_serde::from_slice(data)?),
        }
    }
}

/// Multi-valued header bag with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers(HashMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// All values recorded for `name`, empty if absent.
    pub fn values(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Peer material captured from the transport's TLS session.
///
/// Populated by whatever listener the embedder wires in front of the server;
/// the core only carries it through to user code.
#[derive(Debug, Clone, Default)]
pub struct TlsState {
    pub server_name: Option<String>,
    /// Peer certificate chain, DER encoded.
    pub peer_certificates: Vec<Vec<u8>>,
}

/// A CRUD-shaped operation request, independent of the transport it arrived
/// on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Opaque request identifier.
    #[serde(default = "Request::new_id", rename = "rid")]
    pub id: String,
    pub operation: Operation,
    pub identity: Identity,
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub parent_identity: Identity,
    #[serde(default)]
    pub parent_id: String,
    /// Model version addressed by the request; 0 is the unversioned default.
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    /// Request body, already parsed from the wire encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip)]
    pub encoding: Encoding,
    #[serde(skip)]
    pub tls_state: Option<TlsState>,
}

impl Request {
    pub fn new(operation: Operation, identity: Identity) -> Self {
        Self {
            id: Self::new_id(),
            operation,
            identity,
            object_id: String::new(),
            parent_identity: Identity::default(),
            parent_id: String::new(),
            version: 0,
            headers: Headers::new(),
            data: None,
            client_ip: String::new(),
            username: String::new(),
            password: String::new(),
            encoding: Encoding::Json,
            tls_state: None,
        }
    }

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Install the bearer credentials extracted from an `Authorization`
    /// header or a session token.
    pub fn set_bearer(&mut self, token: impl Into<String>) {
        self.username = "Bearer".to_string();
        self.password = token.into();
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new(Operation::RetrieveMany, Identity::default())
    }
}
