//! Pluggable cluster-wide event fabric.
//!
//! The push server only ever talks to this contract. An in-process
//! implementation lives in [`local`]; wiring a clustered bus client behind
//! the same trait is the embedder's concern.

pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::{EncodingError, Publication};

pub use local::LocalPubSub;

/// Failure talking to the bus.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("not connected to the bus; message dropped")]
    NotConnected,
    #[error("unable to encode publication: {0}")]
    Encoding(#[from] EncodingError),
    #[error("request timed out")]
    Timeout,
    #[error("reply rejected: {0}")]
    Reply(String),
    #[error("bus failure: {0}")]
    Backend(String),
}

/// Validates the reply of a request/response publish.
pub type ReplyValidator = Arc<dyn Fn(&[u8]) -> Result<(), PubSubError> + Send + Sync>;

/// Produces the reply payload for a request/response publication.
pub type Replier = Arc<dyn Fn(&Publication) -> Vec<u8> + Send + Sync>;

/// Options for a publish call.
#[derive(Clone, Default)]
pub struct PublishOptions {
    /// When set, the publish becomes request/response and blocks until the
    /// reply is validated or `timeout` elapses.
    pub reply_validator: Option<ReplyValidator>,
    pub timeout: Option<Duration>,
}

/// Options for a subscribe call.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Deliver each message to at most one member of the named group.
    pub queue_group: Option<String>,
    /// Answer request/response publications on behalf of this subscriber.
    pub replier: Option<Replier>,
}

/// Handle on an in-flight connection attempt.
///
/// The adapter retries at a fixed interval until it succeeds or the caller
/// gives up through [`Waiter::abort`] or the wait timeout.
pub struct Waiter {
    ok: oneshot::Receiver<bool>,
    abort: Option<oneshot::Sender<()>>,
}

impl Waiter {
    pub fn new(ok: oneshot::Receiver<bool>, abort: oneshot::Sender<()>) -> Self {
        Self {
            ok,
            abort: Some(abort),
        }
    }

    /// Wait for the connection outcome. With a timeout, expiry aborts the
    /// attempt and yields `false`.
    pub async fn wait(mut self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => self.ok.await.unwrap_or(false),
            Some(limit) => match tokio::time::timeout(limit, &mut self.ok).await {
                Ok(outcome) => outcome.unwrap_or(false),
                Err(_) => {
                    self.abort();
                    false
                }
            },
        }
    }

    /// Give up on the connection attempt.
    pub fn abort(&mut self) {
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(());
        }
    }
}

/// An active subscription: decoded publications, adapter errors, and the
/// handle that tears it down.
pub struct Subscription {
    pub publications: mpsc::Receiver<Publication>,
    pub errors: mpsc::Receiver<PubSubError>,
    pub unsubscriber: Unsubscriber,
}

/// Explicit unsubscribe handle; dropping it without calling
/// [`Unsubscriber::unsubscribe`] leaves the subscription in place.
pub struct Unsubscriber(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscriber {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Contract between the push server and the cluster bus.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Begin connecting in the background.
    fn connect(&self) -> Waiter;

    async fn disconnect(&self) -> Result<(), PubSubError>;

    async fn publish(
        &self,
        publication: Publication,
        options: PublishOptions,
    ) -> Result<(), PubSubError>;

    fn subscribe(&self, topic: &str, options: SubscribeOptions) -> Subscription;

    /// Cheap health probe answered within `timeout`.
    async fn ping(&self, timeout: Duration) -> Result<(), PubSubError>;
}
