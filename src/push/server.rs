//! The push server: session registry and event fan-out.
//!
//! # Responsibilities
//! - Own the set of live WebSocket sessions (single control loop, no locks)
//! - Accept domain events from local dispatchers and from the cluster bus
//! - Multicast events to eligible push sessions, dropping per-session on
//!   backpressure
//! - Bridge local events onto the bus when a publisher is configured
//!
//! With a publisher configured, local events are published and NOT fanned
//! out directly; delivery to local sessions happens when the event comes
//! back through the subscription. That way a clustered deployment delivers
//! each event exactly once per session no matter which instance produced it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::PushConfig;
use crate::lifecycle::ShutdownHandle;
use crate::model::{Event, Publication};
use crate::observability::metrics;
use crate::pubsub::{PubSub, PublishOptions, SubscribeOptions, Subscription};
use crate::push::session::{Session, SessionKind};
use crate::push::PushSessionHandler;

const EVENT_BUFFER: usize = 1024;
const REGISTRY_BUFFER: usize = 8;

/// Clonable front to the push server's control loop.
#[derive(Clone)]
#[derive(Debug)]
pub struct PushServerHandle {
    register_tx: mpsc::Sender<Arc<Session>>,
    unregister_tx: mpsc::Sender<Arc<Session>>,
    events_tx: mpsc::Sender<Event>,
}

impl PushServerHandle {
    pub(crate) async fn register(&self, session: Arc<Session>) {
        let _ = self.register_tx.send(session).await;
    }

    pub(crate) async fn unregister(&self, session: Arc<Session>) {
        let _ = self.unregister_tx.send(session).await;
    }

    /// Hand an event to the push server. Fire-and-forget: a saturated or
    /// stopped control loop drops the event with a warning.
    pub fn push_event(&self, event: Event) {
        if self.events_tx.try_send(event).is_err() {
            tracing::warn!("Push server event queue unavailable; event dropped");
        }
    }
}

/// The control loop state. Everything in here is owned by the single task
/// spawned in [`PushServer::run`]; mutation happens only through the
/// channels.
pub(crate) struct PushServer {
    topic: String,
    publishable_identities: Vec<String>,
    handler: Option<Arc<dyn PushSessionHandler>>,
    pubsub: Option<Arc<dyn PubSub>>,
    subscription: Option<Subscription>,
    sessions: HashMap<String, Arc<Session>>,
    register_rx: mpsc::Receiver<Arc<Session>>,
    unregister_rx: mpsc::Receiver<Arc<Session>>,
    events_rx: mpsc::Receiver<Event>,
    shutdown: ShutdownHandle,
}

impl PushServer {
    pub(crate) fn new(
        config: &PushConfig,
        handler: Option<Arc<dyn PushSessionHandler>>,
        pubsub: Option<Arc<dyn PubSub>>,
        shutdown: ShutdownHandle,
    ) -> (Self, PushServerHandle) {
        let (register_tx, register_rx) = mpsc::channel(REGISTRY_BUFFER);
        let (unregister_tx, unregister_rx) = mpsc::channel(REGISTRY_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let subscription = pubsub.as_ref().map(|bus| {
            bus.subscribe(
                &config.topic,
                SubscribeOptions {
                    queue_group: if config.queue_group.is_empty() {
                        None
                    } else {
                        Some(config.queue_group.clone())
                    },
                    ..Default::default()
                },
            )
        });

        let server = Self {
            topic: config.topic.clone(),
            publishable_identities: config.publishable_identities.clone(),
            handler,
            pubsub,
            subscription,
            sessions: HashMap::new(),
            register_rx,
            unregister_rx,
            events_rx,
            shutdown,
        };
        let handle = PushServerHandle {
            register_tx,
            unregister_tx,
            events_tx,
        };
        (server, handle)
    }

    /// Run the control loop until shutdown, then drain every session.
    pub(crate) async fn run(mut self) {
        tracing::info!(topic = %self.topic, bridged = self.pubsub.is_some(), "Push server started");

        loop {
            tokio::select! {
                Some(session) = self.register_rx.recv() => self.register_session(session),
                Some(session) = self.unregister_rx.recv() => self.unregister_session(&session),
                Some(event) = self.events_rx.recv() => self.handle_local_event(event).await,
                Some(publication) = recv_subscribed(&mut self.subscription) => {
                    self.handle_bus_publication(publication);
                }
                _ = self.shutdown.wait() => break,
            }
        }

        let sessions: Vec<_> = self.sessions.drain().map(|(_, s)| s).collect();
        for session in sessions {
            metrics::unregister_ws_connection();
            self.notify_stop(&session);
            session.cancel();
        }
        tracing::info!("Push server stopped");
    }

    fn register_session(&mut self, session: Arc<Session>) {
        if self.sessions.contains_key(session.identifier()) {
            return;
        }
        tracing::debug!(session = %session, "Registering session");
        metrics::register_ws_connection();
        self.sessions
            .insert(session.identifier().to_string(), session.clone());
        if let Some(handler) = &self.handler {
            handler.on_push_session_start(&session);
        }
    }

    /// Idempotent: unregistering a session that already left is a no-op.
    fn unregister_session(&mut self, session: &Arc<Session>) {
        if self.sessions.remove(session.identifier()).is_none() {
            return;
        }
        tracing::debug!(session = %session, "Unregistering session");
        metrics::unregister_ws_connection();
        self.notify_stop(session);
        session.cancel();
    }

    fn notify_stop(&self, session: &Arc<Session>) {
        if let Some(handler) = &self.handler {
            handler.on_push_session_stop(session);
        }
    }

    async fn handle_local_event(&mut self, event: Event) {
        if !self.publishable_identities.is_empty()
            && !self.publishable_identities.contains(&event.identity)
        {
            return;
        }

        let Some(bus) = &self.pubsub else {
            self.fan_out(&event);
            return;
        };

        let publication = match Publication::from_event(&self.topic, &event) {
            Ok(publication) => publication,
            Err(e) => {
                tracing::warn!(error = %e, "Unable to encode event for the bus; event dropped");
                return;
            }
        };
        if let Err(e) = bus.publish(publication, PublishOptions::default()).await {
            tracing::warn!(error = %e, "Unable to publish event to the bus; event dropped");
        }
    }

    fn handle_bus_publication(&mut self, publication: Publication) {
        match publication.event() {
            Ok(event) => self.fan_out(&event),
            Err(e) => {
                tracing::warn!(error = %e, "Unable to decode publication from the bus; dropped");
            }
        }
    }

    /// Multicast one event to every eligible push session, non-blocking.
    fn fan_out(&self, event: &Event) {
        let encoded = match serde_json::to_vec(event) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "Unable to encode event for sessions; dropped");
                return;
            }
        };

        for session in self.sessions.values() {
            if session.kind() != SessionKind::Push {
                continue;
            }
            if let Some(handler) = &self.handler {
                if !handler.should_push(session, event) {
                    continue;
                }
            }
            if !session.try_queue_event(encoded.clone()) {
                tracing::warn!(
                    session = %session.identifier(),
                    "Session event buffer full; event dropped for this session",
                );
            }
        }
    }
}

/// Select-friendly receive on an optional subscription; pends forever when
/// no bus is configured.
async fn recv_subscribed(subscription: &mut Option<Subscription>) -> Option<Publication> {
    match subscription {
        Some(subscription) => subscription.publications.recv().await,
        None => std::future::pending().await,
    }
}
