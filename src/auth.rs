//! Authentication, authorization, and auditing contracts.
//!
//! Authenticators and authorizers are consulted in order and speak the same
//! three-way protocol: `Ok` accepts and short-circuits the rest of the
//! chain, `Continue` defers to the next entry, `Ko` rejects. Returning an
//! error aborts the request with that error.

use async_trait::async_trait;

use crate::context::Context;
use crate::model::ApiError;
use crate::push::Session;

/// Verdict returned by authenticators and authorizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Accept; the remaining entries in the chain are skipped.
    Ok,
    /// No opinion; defer to the next entry.
    Continue,
    /// Reject.
    Ko,
}

/// Authenticates one request.
#[async_trait]
pub trait RequestAuthenticator: Send + Sync {
    async fn authenticate_request(&self, ctx: &mut Context) -> Result<AuthAction, ApiError>;
}

/// Authenticates a WebSocket session, once at handshake time.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    async fn authenticate_session(&self, session: &Session) -> Result<AuthAction, ApiError>;
}

/// Authorizes an authenticated request.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_authorized(&self, ctx: &Context) -> Result<AuthAction, ApiError>;
}

/// Post-operation audit hook.
///
/// Invoked after every dispatch, success or failure. Fire-and-forget: an
/// auditer must handle its own failures; nothing it does can alter the
/// response.
pub trait Auditer: Send + Sync {
    fn audit(&self, ctx: &Context, err: Option<&ApiError>);
}
