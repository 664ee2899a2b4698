//! The WebSocket API session: many in-flight operations multiplexed over
//! one long-lived socket.
//!
//! Two loops drive a session. The read loop decodes Requests off the wire
//! in client order into a bounded channel; the listen loop pulls them,
//! stamps session credentials, and dispatches each on its own task through
//! the same pipeline the HTTP path uses. Responses are written back as they
//! finish, so they are not ordered.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::StreamExt;
use futures_util::{FutureExt, SinkExt};
use tokio::sync::mpsc;

use crate::context::Context;
use crate::handlers::{handle_operation, panic_description, process_error};
use crate::model::{ApiError, Request, Response};
use crate::push::session::Session;
use crate::push::PushServerHandle;
use crate::server::CoreState;

/// Bound on decoded-but-undispatched requests; the only intra-session
/// backpressure knob.
const REQUEST_BUFFER: usize = 8;

const WRITE_BUFFER: usize = 64;

pub(crate) struct ApiSession {
    session: Arc<Session>,
    state: Arc<CoreState>,
    push: Option<PushServerHandle>,
}

impl ApiSession {
    pub(crate) fn new(
        session: Arc<Session>,
        state: Arc<CoreState>,
        push: Option<PushServerHandle>,
    ) -> Self {
        Self {
            session,
            state,
            push,
        }
    }

    /// Drive the session until the socket dies or the session is cancelled,
    /// then unregister.
    pub(crate) async fn run(self, socket: WebSocket) {
        let (mut sink, stream) = socket.split();
        let (write_tx, mut write_rx) = mpsc::channel::<Message>(WRITE_BUFFER);
        let (requests_tx, mut requests_rx) = mpsc::channel::<Request>(REQUEST_BUFFER);

        let write_scope = self.session.cancel_scope();
        let writer = tokio::spawn(async move {
            while let Some(message) = write_rx.recv().await {
                if sink.send(message).await.is_err() {
                    write_scope.cancel();
                    break;
                }
            }
        });

        let reader = tokio::spawn(read_loop(
            stream,
            requests_tx,
            write_tx.clone(),
            self.session.clone(),
        ));

        let mut cancel = self.session.cancel_handle();
        loop {
            tokio::select! {
                maybe = requests_rx.recv() => {
                    let Some(mut request) = maybe else { break };

                    // Backport the session token into requests that carry no
                    // explicit credentials, and attach the TLS peer state.
                    if request.password.is_empty() && !self.session.token().is_empty() {
                        request.set_bearer(self.session.token());
                    }
                    request.tls_state = self.session.tls_state().cloned();
                    if request.client_ip.is_empty() {
                        request.client_ip = self.session.client_ip().to_string();
                    }

                    tokio::spawn(handle_session_request(
                        request,
                        self.state.clone(),
                        write_tx.clone(),
                    ));
                }
                _ = cancel.cancelled() => break,
            }
        }

        self.session.cancel();
        if let Some(push) = &self.push {
            push.unregister(self.session.clone()).await;
        }
        reader.abort();
        writer.abort();
    }
}

/// Decode Requests off the socket in wire order. Syntax errors answer a
/// framed 400 and reading continues; transport errors cancel the session.
async fn read_loop(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    requests_tx: mpsc::Sender<Request>,
    write_tx: mpsc::Sender<Message>,
    session: Arc<Session>,
) {
    let mut cancel = session.cancel_handle();
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = cancel.cancelled() => return,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                session.cancel();
                return;
            }
            Some(Ok(_)) => continue,
        };

        let request = match serde_json::from_str::<Request>(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                let mut response = Response::new(Request::default());
                let err = ApiError::bad_request(format!("Invalid JSON: {e}"));
                response.status_code = err.code;
                if response.encode(&[err]).is_ok() {
                    write_frame(&write_tx, &response).await;
                }
                continue;
            }
        };

        if requests_tx.send(request).await.is_err() {
            // Session is being torn down.
            return;
        }
    }
}

/// One in-flight operation. Has its own crash barrier: a panic answers a
/// framed 500 on the socket and the session survives.
async fn handle_session_request(
    request: Request,
    state: Arc<CoreState>,
    write_tx: mpsc::Sender<Message>,
) {
    let bare_request = request.clone();
    let ctx = Context::new(request);
    let span = ctx.span().clone();

    match std::panic::AssertUnwindSafe(handle_operation(ctx, state))
        .catch_unwind()
        .await
    {
        Ok(Some(response)) => write_frame(&write_tx, &response).await,
        Ok(None) => {}
        Err(payload) => {
            let description = panic_description(payload.as_ref());
            tracing::error!(panic = %description, "Recovered panic in session request");
            let err = process_error(&span, ApiError::internal(description));
            let mut response = Response::new(bare_request);
            response.status_code = err.code;
            if response.encode(&[err]).is_ok() {
                write_frame(&write_tx, &response).await;
            }
        }
    }
}

async fn write_frame(write_tx: &mpsc::Sender<Message>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(frame) => {
            let _ = write_tx.send(Message::Text(frame.into())).await;
        }
        Err(e) => tracing::error!(error = %e, "Unable to encode response frame"),
    }
}
