//! Resource identities, operation kinds, and the relationship registry.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed name for a resource kind.
///
/// `name` is the singular form (e.g. `user`), `category` the plural
/// collection form (e.g. `users`). The empty identity is used as a
/// "no parent" marker on requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub name: String,
    pub category: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }

    /// The reserved identity naming the top-level anchor of the model.
    pub fn root() -> Self {
        Self::new("root", "root")
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.category.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.name == "root"
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<identity {}|{}>", self.name, self.category)
    }
}

/// The seven CRUD-shaped operation kinds.
///
/// The wire form is kebab-case (`retrieve-many`); `Display` renders the
/// human form used in error messages (`RetrieveMany`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    RetrieveMany,
    Retrieve,
    Create,
    Update,
    Delete,
    Info,
    Patch,
}

impl Operation {
    /// The lowercase wire name of the operation.
    pub fn wire(&self) -> &'static str {
        match self {
            Operation::RetrieveMany => "retrieve-many",
            Operation::Retrieve => "retrieve",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Info => "info",
            Operation::Patch => "patch",
        }
    }

    /// Whether the operation can mutate the model.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Update | Operation::Delete | Operation::Patch
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::RetrieveMany => "RetrieveMany",
            Operation::Retrieve => "Retrieve",
            Operation::Create => "Create",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
            Operation::Info => "Info",
            Operation::Patch => "Patch",
        };
        f.write_str(s)
    }
}

/// Declarative matrix of the (operation, child, parent) triples permitted by
/// one model version.
///
/// Consulted by the handler shells before any processor runs; a miss yields
/// 405 without touching user code.
#[derive(Debug, Clone, Default)]
pub struct RelationshipsRegistry {
    allowed: HashMap<String, HashMap<String, HashSet<Operation>>>,
}

impl RelationshipsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit `operation` on `child` under `parent`.
    pub fn allow(&mut self, child: &Identity, parent: &Identity, operation: Operation) {
        self.allowed
            .entry(child.name.clone())
            .or_default()
            .entry(parent.name.clone())
            .or_default()
            .insert(operation);
    }

    /// Permit every operation on `child` under `parent`.
    pub fn allow_all(&mut self, child: &Identity, parent: &Identity) {
        for op in [
            Operation::RetrieveMany,
            Operation::Retrieve,
            Operation::Create,
            Operation::Update,
            Operation::Delete,
            Operation::Info,
            Operation::Patch,
        ] {
            self.allow(child, parent, op);
        }
    }

    pub fn is_operation_allowed(
        &self,
        child: &Identity,
        parent: &Identity,
        operation: Operation,
    ) -> bool {
        self.allowed
            .get(&child.name)
            .and_then(|parents| parents.get(&parent.name))
            .map(|ops| ops.contains(&operation))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_emptiness() {
        assert!(Identity::default().is_empty());
        assert!(!Identity::root().is_empty());
        assert!(!Identity::new("user", "users").is_empty());
    }

    #[test]
    fn operation_wire_names() {
        assert_eq!(Operation::RetrieveMany.wire(), "retrieve-many");
        assert_eq!(Operation::Patch.wire(), "patch");
        assert_eq!(Operation::RetrieveMany.to_string(), "RetrieveMany");
    }

    #[test]
    fn operation_wire_roundtrip() {
        let op: Operation = serde_json::from_str(r#""retrieve-many""#).unwrap();
        assert_eq!(op, Operation::RetrieveMany);
        assert_eq!(serde_json::to_string(&op).unwrap(), r#""retrieve-many""#);
    }

    #[test]
    fn registry_gates_by_parent() {
        let user = Identity::new("user", "users");
        let mut registry = RelationshipsRegistry::new();
        registry.allow(&user, &Identity::root(), Operation::RetrieveMany);

        assert!(registry.is_operation_allowed(&user, &Identity::root(), Operation::RetrieveMany));
        assert!(!registry.is_operation_allowed(&user, &user, Operation::RetrieveMany));
        assert!(!registry.is_operation_allowed(&user, &Identity::root(), Operation::Create));
    }
}
