//! Client-facing error taxonomy.
//!
//! Every failure surfaced to a client is one [`ApiError`]; the wire form is
//! a JSON array of error objects so multiple failures can travel together.

use serde::{Deserialize, Serialize};

use crate::model::{Identity, Operation};

/// Subject attached to errors produced by the framework itself.
pub const ERROR_SUBJECT: &str = "bahamut";

fn default_trace() -> String {
    "unknown".to_string()
}

/// A single client-visible error.
///
/// Field declaration order is the wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("error {code} ({subject}): {title}: {description}")]
pub struct ApiError {
    pub code: u16,
    #[serde(default)]
    pub data: serde_json::Value,
    pub description: String,
    pub subject: String,
    pub title: String,
    #[serde(default = "default_trace")]
    pub trace: String,
}

impl ApiError {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        subject: impl Into<String>,
        code: u16,
    ) -> Self {
        Self {
            code,
            data: serde_json::Value::Null,
            description: description.into(),
            subject: subject.into(),
            title: title.into(),
            trace: default_trace(),
        }
    }

    pub fn not_allowed(description: impl Into<String>) -> Self {
        Self::new("Not allowed", description, ERROR_SUBJECT, 405)
    }

    pub fn unauthorized(description: impl Into<String>) -> Self {
        Self::new("Unauthorized", description, ERROR_SUBJECT, 401)
    }

    pub fn forbidden(description: impl Into<String>) -> Self {
        Self::new("Forbidden", description, ERROR_SUBJECT, 403)
    }

    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new("Bad Request", description, ERROR_SUBJECT, 400)
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new("Not Found", description, ERROR_SUBJECT, 404)
    }

    pub fn conflict(description: impl Into<String>) -> Self {
        Self::new("Conflict", description, ERROR_SUBJECT, 409)
    }

    pub fn locked(description: impl Into<String>) -> Self {
        Self::new("Locked", description, ERROR_SUBJECT, 423)
    }

    /// The canonical "no processor handles this" error.
    pub fn not_implemented(operation: Operation, identity: &Identity) -> Self {
        Self::new(
            "Not implemented",
            format!(
                "No handler for operation {} on {}",
                operation.wire(),
                identity.name
            ),
            ERROR_SUBJECT,
            501,
        )
    }

    pub fn timeout(description: impl Into<String>) -> Self {
        Self::new("Request Timeout", description, ERROR_SUBJECT, 408)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new("Internal Server Error", description, ERROR_SUBJECT, 500)
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_matches_contract() {
        let err = ApiError::not_implemented(
            Operation::RetrieveMany,
            &Identity::new("user", "users"),
        );
        let body = serde_json::to_string(&[&err]).unwrap();
        assert_eq!(
            body,
            r#"[{"code":501,"data":null,"description":"No handler for operation retrieve-many on user","subject":"bahamut","title":"Not implemented","trace":"unknown"}]"#
        );
    }

    #[test]
    fn display_form() {
        let err = ApiError::internal("Noooooooooooooooooo");
        assert_eq!(
            err.to_string(),
            "error 500 (bahamut): Internal Server Error: Noooooooooooooooooo"
        );
    }

    #[test]
    fn taxonomy_codes() {
        assert_eq!(ApiError::not_allowed("x").code, 405);
        assert_eq!(ApiError::unauthorized("x").code, 401);
        assert_eq!(ApiError::forbidden("x").code, 403);
        assert_eq!(ApiError::bad_request("x").code, 400);
        assert_eq!(ApiError::not_found("x").code, 404);
        assert_eq!(ApiError::conflict("x").code, 409);
        assert_eq!(ApiError::locked("x").code, 423);
        assert_eq!(ApiError::timeout("x").code, 408);
        assert_eq!(ApiError::internal("x").code, 500);
    }
}
