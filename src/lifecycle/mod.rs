//! Process lifecycle concerns.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Trigger → API listener drains → push control loop unregisters
//!     every session → tasks join → stop() returns
//! ```

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownHandle};
