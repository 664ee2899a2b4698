//! Framework for building model-driven HTTP+WebSocket API servers.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client request (HTTP or WebSocket frame)
//!       → api (axum entrypoint) / push::api_session (WS multiplexing)
//!       → Context (per-request bag + cancellation scope)
//!       → handlers (relationship gate, runner, response shaping)
//!       → dispatchers (authenticate → authorize → unmarshal → processor
//!         → audit → events)
//!       → Response
//!
//!   Emitted events
//!       → push::server (session registry + fan-out control loop)
//!       → pubsub adapter (optional cluster bus bridge)
//!       → every subscribed session, on every instance
//! ```
//!
//! Embedders implement [`Processor`] for each resource identity, register
//! them on a [`Server`], and provide the model through [`ModelManager`].
//! Everything else (authentication chains, authorization, auditing, push
//! fan-out, read-only mode, sparse responses) is wired through
//! configuration and the `with_*` setters.

// Core pipeline
pub mod context;
pub mod dispatchers;
pub mod handlers;
pub mod processor;
pub mod server;

// Contracts
pub mod auth;
pub mod model;

// Transports and fan-out
pub mod api;
pub mod push;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod pubsub;

#[cfg(test)]
pub(crate) mod testmodel;

pub use api::HealthCheck;
pub use auth::{Auditer, AuthAction, Authorizer, RequestAuthenticator, SessionAuthenticator};
pub use config::{ApiConfig, Config, PushConfig};
pub use context::{CancelCause, CancelScope, Context};
pub use handlers::TraceCleaner;
pub use model::{
    ApiError, Encoding, Event, EventKind, Headers, Identifiable, Identity, ModelManager,
    Operation, Output, Publication, RelationshipsRegistry, Request, Response, Unmarshaller,
};
pub use processor::Processor;
pub use pubsub::{LocalPubSub, PubSub, PubSubError, PublishOptions, SubscribeOptions};
pub use push::{EventPusher, PushSessionHandler, Session, SessionKind};
pub use server::{Server, ServerError, ServerHandle};
