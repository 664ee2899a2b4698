//! Tiny model used by the unit tests: users and lists under the root.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{
    EncodingError, Identifiable, Identity, ModelManager, RelationshipsRegistry, UnmarshalError,
};

pub(crate) fn user_identity() -> Identity {
    Identity::new("user", "users")
}

pub(crate) fn list_identity() -> Identity {
    Identity::new("list", "lists")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub(crate) struct User {
    #[serde(default)]
    pub ID: String,
    #[serde(default)]
    pub name: String,
}

impl Identifiable for User {
    fn identity(&self) -> Identity {
        user_identity()
    }

    fn identifier(&self) -> String {
        self.ID.clone()
    }

    fn set_identifier(&mut self, identifier: String) {
        self.ID = identifier;
    }

    fn to_value(&self) -> Result<serde_json::Value, EncodingError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub(crate) struct List {
    #[serde(default)]
    pub ID: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub secret: String,
}

impl List {
    pub(crate) fn named(id: &str, name: &str) -> Self {
        Self {
            ID: id.to_string(),
            name: name.to_string(),
            description: " the description".to_string(),
            secret: String::new(),
        }
    }
}

impl Identifiable for List {
    fn identity(&self) -> Identity {
        list_identity()
    }

    fn identifier(&self) -> String {
        self.ID.clone()
    }

    fn set_identifier(&mut self, identifier: String) {
        self.ID = identifier;
    }

    fn to_value(&self) -> Result<serde_json::Value, EncodingError> {
        Ok(serde_json::to_value(self)?)
    }

    fn secret_attributes(&self) -> &'static [&'static str] {
        &["secret"]
    }
}

/// An identifiable whose serialization always fails.
#[derive(Debug, Default)]
pub(crate) struct Unserializable;

impl Identifiable for Unserializable {
    fn identity(&self) -> Identity {
        Identity::new("broken", "brokens")
    }

    fn identifier(&self) -> String {
        String::new()
    }

    fn set_identifier(&mut self, _identifier: String) {}

    fn to_value(&self) -> Result<serde_json::Value, EncodingError> {
        #[derive(Serialize)]
        struct Bad {
            #[serde(serialize_with = "fail")]
            marker: (),
        }
        fn fail<S: serde::Serializer>(_: &(), _s: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not serializable"))
        }
        serde_json::to_value(Bad { marker: () }).map_err(EncodingError::from)
    }
}

pub(crate) struct TestModelManager {
    registry: RelationshipsRegistry,
}

impl TestModelManager {
    fn new() -> Self {
        let mut registry = RelationshipsRegistry::new();
        registry.allow_all(&user_identity(), &Identity::root());
        registry.allow_all(&list_identity(), &Identity::root());
        registry.allow_all(&user_identity(), &list_identity());
        Self { registry }
    }
}

impl ModelManager for TestModelManager {
    fn relationships(&self) -> &RelationshipsRegistry {
        &self.registry
    }

    fn identity_from_category(&self, category: &str) -> Option<Identity> {
        match category {
            "users" => Some(user_identity()),
            "lists" => Some(list_identity()),
            _ => None,
        }
    }

    fn identity_from_name(&self, name: &str) -> Option<Identity> {
        match name {
            "user" => Some(user_identity()),
            "list" => Some(list_identity()),
            _ => None,
        }
    }

    fn unmarshal(
        &self,
        identity: &Identity,
        data: &serde_json::Value,
    ) -> Result<Box<dyn Identifiable>, UnmarshalError> {
        match identity.name.as_str() {
            "user" => {
                if data.is_null() {
                    Ok(Box::new(User::default()))
                } else {
                    Ok(Box::new(serde_json::from_value::<User>(data.clone())?))
                }
            }
            "list" => {
                if data.is_null() {
                    Ok(Box::new(List::default()))
                } else {
                    Ok(Box::new(serde_json::from_value::<List>(data.clone())?))
                }
            }
            other => Err(format!("unknown identity {other}").into()),
        }
    }
}

pub(crate) fn manager() -> Arc<dyn ModelManager> {
    Arc::new(TestModelManager::new())
}
