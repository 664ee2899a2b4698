//! Domain events and their cluster envelope.

use serde::{Deserialize, Serialize};

use crate::model::{EncodingError, Identifiable, Operation};

/// The kind of domain change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    /// The event kind a successful write operation produces, if any.
    pub fn from_operation(operation: Operation) -> Option<Self> {
        match operation {
            Operation::Create => Some(EventKind::Create),
            Operation::Update => Some(EventKind::Update),
            Operation::Delete => Some(EventKind::Delete),
            _ => None,
        }
    }
}

/// A domain change, ready for local fan-out and cluster delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Singular name of the changed resource kind.
    pub identity: String,
    /// Full JSON payload of the changed object.
    pub entity: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, identity: impl Into<String>, entity: serde_json::Value) -> Self {
        Self {
            kind,
            identity: identity.into(),
            entity,
        }
    }

    /// Build an event from the object a processor produced.
    pub fn from_identifiable(
        kind: EventKind,
        object: &dyn Identifiable,
    ) -> Result<Self, EncodingError> {
        Ok(Self {
            kind,
            identity: object.identity().name,
            entity: object.to_value()?,
        })
    }
}

/// A topic-addressed envelope carrying a serialized event across the bus.
///
/// The envelope itself travels msgpack-encoded; the payload stays whatever
/// the producer put in it (here, event JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub topic: String,
    pub data: Vec<u8>,
}

impl Publication {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            data: Vec::new(),
        }
    }

    pub fn from_event(topic: impl Into<String>, event: &Event) -> Result<Self, EncodingError> {
        Ok(Self {
            topic: topic.into(),
            data: serde_json::to_vec(event)?,
        })
    }

    /// Decode the carried event payload.
    pub fn event(&self) -> Result<Event, EncodingError> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, EncodingError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
