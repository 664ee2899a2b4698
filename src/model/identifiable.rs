//! Identifiable contracts, model managers, and output shaping.
//!
//! # Responsibilities
//! - Define the thin contract the framework needs from model objects
//! - Resolve identities and default-construct objects per model version
//! - Shape processor output for the wire: secret stripping and sparse
//!   field projection

use std::fmt;

use serde_json::Value;

use crate::model::{EncodingError, Identity, RelationshipsRegistry, Request};

/// Error type for user-provided model plumbing.
pub type UnmarshalError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An addressable model object.
pub trait Identifiable: Send + Sync {
    /// The identity of the resource kind this object belongs to.
    fn identity(&self) -> Identity;

    fn identifier(&self) -> String;

    fn set_identifier(&mut self, identifier: String);

    /// Serialize the object to a JSON value.
    fn to_value(&self) -> Result<Value, EncodingError>;

    /// Attribute names that must never leave the process.
    fn secret_attributes(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Version-scoped access to the model: relationships, identity resolution,
/// and construction from request bodies.
pub trait ModelManager: Send + Sync {
    fn relationships(&self) -> &RelationshipsRegistry;

    fn identity_from_category(&self, category: &str) -> Option<Identity>;

    fn identity_from_name(&self, name: &str) -> Option<Identity>;

    /// Construct an instance of `identity` from `data`. `Value::Null` means
    /// "no body" and yields a default-constructed instance.
    fn unmarshal(
        &self,
        identity: &Identity,
        data: &Value,
    ) -> Result<Box<dyn Identifiable>, UnmarshalError>;
}

/// Per-identity override for turning a raw request into a model object.
pub type Unmarshaller =
    std::sync::Arc<dyn Fn(&Request) -> Result<Box<dyn Identifiable>, UnmarshalError> + Send + Sync>;

/// Output payload a processor attaches to its Context.
pub enum Output {
    One(Box<dyn Identifiable>),
    Many(Vec<Box<dyn Identifiable>>),
}

impl Output {
    /// Render to a wire value, stripping secret attributes and, when
    /// `fields` is non-empty, keeping only the listed attributes.
    pub fn to_wire_value(&self, fields: &[String]) -> Result<Value, EncodingError> {
        match self {
            Output::One(object) => shape(object.as_ref(), fields),
            Output::Many(objects) => Ok(Value::Array(
                objects
                    .iter()
                    .map(|o| shape(o.as_ref(), fields))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }

    /// The single object carried, if this output is one identifiable.
    pub fn as_one(&self) -> Option<&dyn Identifiable> {
        match self {
            Output::One(object) => Some(object.as_ref()),
            Output::Many(_) => None,
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::One(o) => write!(f, "Output::One({})", o.identity()),
            Output::Many(os) => write!(f, "Output::Many(len={})", os.len()),
        }
    }
}

fn shape(object: &dyn Identifiable, fields: &[String]) -> Result<Value, EncodingError> {
    let mut value = object.to_value()?;
    if let Value::Object(map) = &mut value {
        for secret in object.secret_attributes() {
            map.remove(*secret);
        }
        if !fields.is_empty() {
            map.retain(|key, _| fields.iter().any(|f| f == key));
        }
    }
    Ok(value)
}
