//! Live WebSocket session state shared by the push and API flavors.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::context::{CancelHandle, CancelScope};
use crate::model::TlsState;

/// How many outbound events a session may buffer before fan-out starts
/// dropping for it.
pub(crate) const SESSION_EVENT_BUFFER: usize = 64;

/// What a session is used for. Only push sessions take part in event
/// fan-out; API sessions multiplex operation requests instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Push,
    Api,
}

/// A long-lived WebSocket conversation.
///
/// Owned by the push server between register and unregister; the transport
/// drives its socket loops and the control loop owns registry membership.
pub struct Session {
    id: String,
    kind: SessionKind,
    parameters: HashMap<String, String>,
    token: String,
    client_ip: String,
    tls_state: Option<TlsState>,
    cancel: CancelScope,
    events_tx: mpsc::Sender<Vec<u8>>,
    events_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl Session {
    pub(crate) fn new(
        kind: SessionKind,
        parameters: HashMap<String, String>,
        client_ip: String,
        tls_state: Option<TlsState>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let token = parameters.get("token").cloned().unwrap_or_default();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            parameters,
            token,
            client_ip,
            tls_state,
            cancel: CancelScope::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Negotiated parameters, typically query-derived filters.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Bearer token carried by the session, if any.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn tls_state(&self) -> Option<&TlsState> {
        self.tls_state.as_ref()
    }

    /// Stop signal for the session's socket loops.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_scope(&self) -> CancelScope {
        self.cancel.clone()
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle {
        self.cancel.handle()
    }

    /// Non-blocking enqueue of an encoded event for the write loop.
    /// `false` means the session buffer is full and the event was dropped.
    pub(crate) fn try_queue_event(&self, event: Vec<u8>) -> bool {
        self.events_tx.try_send(event).is_ok()
    }

    /// Hand the outbound event stream to the session's write loop. Yields
    /// `None` on the second call.
    pub(crate) async fn take_event_stream(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.events_rx.lock().await.take()
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<session id:{} kind:{:?}>", self.id, self.kind)
    }
}

/// Drive a push session's socket: queued events go out to the client,
/// inbound frames are drained and ignored. Socket errors and cancellation
/// both end in an (idempotent) unregister.
pub(crate) async fn run_push_session(
    session: std::sync::Arc<Session>,
    socket: axum::extract::ws::WebSocket,
    push: crate::push::PushServerHandle,
) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let Some(mut events) = session.take_event_stream().await else {
        return;
    };
    let (mut sink, mut stream) = socket.split();
    let mut cancel = session.cancel_handle();

    loop {
        tokio::select! {
            maybe = events.recv() => {
                let Some(encoded) = maybe else { break };
                let Ok(text) = String::from_utf8(encoded) else { continue };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
            _ = cancel.cancelled() => break,
        }
    }

    session.cancel();
    push.unregister(session).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(kind: SessionKind) -> Session {
        let mut params = HashMap::new();
        params.insert("token".to_string(), "tok".to_string());
        params.insert("filter".to_string(), "lists".to_string());
        Session::new(kind, params, "127.0.0.1".to_string(), None)
    }

    #[test]
    fn token_is_lifted_from_parameters() {
        let s = session(SessionKind::Push);
        assert_eq!(s.token(), "tok");
        assert_eq!(s.parameter("filter"), Some("lists"));
        assert_eq!(s.parameter("missing"), None);
    }

    #[tokio::test]
    async fn event_queue_drops_when_full() {
        let s = session(SessionKind::Push);
        for _ in 0..SESSION_EVENT_BUFFER {
            assert!(s.try_queue_event(b"e".to_vec()));
        }
        assert!(!s.try_queue_event(b"overflow".to_vec()));

        let mut rx = s.take_event_stream().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"e");
        // The stream can only be claimed once.
        assert!(s.take_event_stream().await.is_none());
    }
}
