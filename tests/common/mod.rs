//! Shared fixtures for the integration suites: a tiny model with users and
//! lists, plus helpers to boot a server on an ephemeral port.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use bahamut::model::{EncodingError, UnmarshalError};
use bahamut::{
    Config, Identifiable, Identity, ModelManager, RelationshipsRegistry, Server, ServerHandle,
};

pub fn user_identity() -> Identity {
    Identity::new("user", "users")
}

pub fn list_identity() -> Identity {
    Identity::new("list", "lists")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(non_snake_case)]
pub struct User {
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
pub struct List {
    #[serde(default)]
    pub ID: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl List {
    pub fn named(id: &str, name: &str) -> Self {
        Self {
            ID: id.to_string(),
            name: name.to_string(),
            description: " the description".to_string(),
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
}

pub struct TestModel {
    registry: RelationshipsRegistry,
}

impl TestModel {
    pub fn new() -> Arc<Self> {
        let mut registry = RelationshipsRegistry::new();
        registry.allow_all(&user_identity(), &Identity::root());
        registry.allow_all(&list_identity(), &Identity::root());
        Arc::new(Self { registry })
    }
}

impl ModelManager for TestModel {
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
            "user" => Ok(Box::new(if data.is_null() {
                User::default()
            } else {
                serde_json::from_value::<User>(data.clone())?
            })),
            "list" => Ok(Box::new(if data.is_null() {
                List::default()
            } else {
                serde_json::from_value::<List>(data.clone())?
            })),
            other => Err(format!("unknown identity {other}").into()),
        }
    }
}

/// Base config bound to an ephemeral port.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.api.listen_address = "127.0.0.1:0".to_string();
    config
}

/// Boot a server with the test model installed, letting the caller finish
/// the wiring.
pub async fn start_server(configure: impl FnOnce(Server) -> Server) -> ServerHandle {
    let server = Server::new(test_config()).with_model_manager(0, TestModel::new());
    configure(server)
        .start()
        .await
        .expect("server failed to start")
}

/// Query parameters for a WS session URL.
pub fn ws_url(handle: &ServerHandle, path: &str, params: &HashMap<String, String>) -> String {
    let addr = handle.api_address().expect("API not bound");
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    if query.is_empty() {
        format!("ws://{addr}{path}")
    } else {
        format!("ws://{addr}{path}?{query}")
    }
}
