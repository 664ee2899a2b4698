//! The push subsystem: live WebSocket sessions, event fan-out, and the
//! bridge to the optional cluster bus.

pub mod api_session;
pub mod server;
pub mod session;

use std::sync::Arc;

use crate::model::{ApiError, Event};

pub use server::PushServerHandle;
pub use session::{Session, SessionKind};

/// Fire-and-forget sink dispatchers hand successful write events to.
pub type EventPusher = Arc<dyn Fn(Event) + Send + Sync>;

/// Optional collaborator notified around the push session lifecycle.
///
/// All methods have permissive defaults; implement only what you need.
pub trait PushSessionHandler: Send + Sync {
    /// Called before a session is registered. Returning `Ok(false)` or an
    /// error closes the socket without registering.
    fn on_push_session_init(&self, _session: &Session) -> Result<bool, ApiError> {
        Ok(true)
    }

    /// Called once the session is in the registry.
    fn on_push_session_start(&self, _session: &Session) {}

    /// Called once the session has left the registry.
    fn on_push_session_stop(&self, _session: &Session) {}

    /// Per-session fan-out filter; `false` drops the event for this session.
    fn should_push(&self, _session: &Session, _event: &Event) -> bool {
        true
    }
}
