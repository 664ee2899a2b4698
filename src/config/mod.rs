//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Config (validated, immutable)
//!     → consumed by Server::start
//! ```
//!
//! # Design Decisions
//! - All fields have defaults so minimal configs parse
//! - Runtime collaborators (authenticators, model managers, …) cannot be
//!   serialized and attach through Server setters instead
//! - Knobs for out-of-scope surfaces (TLS paths, profiling, bus URL) are
//!   recognized so embedder configs parse, even where the wiring is the
//!   embedder's concern

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ApiConfig, Config, PushConfig, TlsConfig};
pub use validation::{validate_config, ValidationError};
