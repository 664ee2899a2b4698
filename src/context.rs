//! Per-request context and its cancellation scope.

use std::fmt;

use tokio::sync::watch;

use crate::model::{Output, Request};

/// Why a request scope ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The client gave up; nothing should be written back.
    Cancelled,
    /// A transport deadline fired; the client gets a 408.
    DeadlineExceeded,
}

/// Cooperative cancellation scope derived from the transport.
///
/// Cloning yields another trigger for the same scope. The first cause wins;
/// later triggers are no-ops.
#[derive(Debug, Clone)]
pub struct CancelScope {
    tx: watch::Sender<Option<CancelCause>>,
}

impl CancelScope {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn cancel(&self) {
        self.set(CancelCause::Cancelled);
    }

    pub fn deadline_exceeded(&self) {
        self.set(CancelCause::DeadlineExceeded);
    }

    fn set(&self, cause: CancelCause) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(cause);
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaitable view of a [`CancelScope`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    rx: watch::Receiver<Option<CancelCause>>,
}

impl CancelHandle {
    /// Resolves once the scope is cancelled, with the cause. A dropped scope
    /// counts as a plain cancellation.
    pub async fn cancelled(&mut self) -> CancelCause {
        loop {
            if let Some(cause) = *self.rx.borrow() {
                return cause;
            }
            if self.rx.changed().await.is_err() {
                return CancelCause::Cancelled;
            }
        }
    }

    pub fn cause(&self) -> Option<CancelCause> {
        *self.rx.borrow()
    }
}

/// Cancels a scope when dropped without being disarmed.
///
/// The transports hold one of these across a dispatch so that an abandoned
/// handler future (client hung up) still propagates cancellation to the
/// dispatcher task.
pub(crate) struct CancelGuard {
    scope: CancelScope,
    armed: bool,
}

impl CancelGuard {
    pub(crate) fn new(scope: CancelScope) -> Self {
        Self { scope, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.scope.cancel();
        }
    }
}

/// Per-request mutable bag carried through the dispatch pipeline.
///
/// Created at request entry, mutated by authenticators, authorizers, and the
/// processor, consumed once by response shaping.
pub struct Context {
    request: Request,
    cancel: CancelScope,
    span: tracing::Span,
    status_code: Option<u16>,
    count: u64,
    messages: Vec<String>,
    claims: Vec<String>,
    input_data: Option<Box<dyn crate::model::Identifiable>>,
    output_data: Option<Output>,
    redirect: Option<String>,
}

impl Context {
    pub fn new(request: Request) -> Self {
        let span = tracing::info_span!(
            "api.operation",
            operation = %request.operation,
            identity = %request.identity.name,
            rid = %request.id,
            status.code = tracing::field::Empty,
            count_total = tracing::field::Empty,
            messages = tracing::field::Empty,
            response = tracing::field::Empty,
        );
        Self {
            request,
            cancel: CancelScope::new(),
            span,
            status_code: None,
            count: 0,
            messages: Vec::new(),
            claims: Vec::new(),
            input_data: None,
            output_data: None,
            redirect: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Another trigger for this request's cancellation scope.
    pub fn cancel_scope(&self) -> CancelScope {
        self.cancel.clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.handle()
    }

    /// Status override; `None` means "derive from the operation".
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.status_code = Some(code);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn set_count(&mut self, count: u64) {
        self.count = count;
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Queue a user-visible message for the response.
    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Claims recorded by authenticators about the principal.
    pub fn claims(&self) -> &[String] {
        &self.claims
    }

    pub fn set_claims(&mut self, claims: Vec<String>) {
        self.claims = claims;
    }

    /// Object unmarshalled from the request body, for write operations.
    pub fn input_data(&self) -> Option<&dyn crate::model::Identifiable> {
        self.input_data.as_deref()
    }

    pub fn take_input_data(&mut self) -> Option<Box<dyn crate::model::Identifiable>> {
        self.input_data.take()
    }

    pub fn set_input_data(&mut self, data: Box<dyn crate::model::Identifiable>) {
        self.input_data = Some(data);
    }

    pub fn output_data(&self) -> Option<&Output> {
        self.output_data.as_ref()
    }

    pub fn set_output_data(&mut self, data: Option<Output>) {
        self.output_data = data;
    }

    pub fn redirect(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    pub fn set_redirect(&mut self, url: impl Into<String>) {
        self.redirect = Some(url.into());
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request.id)
            .field("operation", &self.request.operation)
            .field("identity", &self.request.identity.name)
            .field("status_code", &self.status_code)
            .field("count", &self.count)
            .field("redirect", &self.redirect)
            .finish()
    }
}
