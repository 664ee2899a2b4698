//! Top-level server: processor registry, subsystem assembly, start/stop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::api::server::{ApiServer, AppState};
use crate::api::HealthCheck;
use crate::auth::{Auditer, Authorizer, RequestAuthenticator, SessionAuthenticator};
use crate::config::{validate_config, Config, ConfigError};
use crate::handlers::TraceCleaner;
use crate::lifecycle::Shutdown;
use crate::model::{Event, Identity, ModelManager, Unmarshaller};
use crate::processor::{Processor, ProcessorFinder};
use crate::pubsub::PubSub;
use crate::push::server::PushServer;
use crate::push::{EventPusher, PushServerHandle, PushSessionHandler};

/// Failure assembling or running a Server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("identity {0} already has a registered processor")]
    DuplicateProcessor(String),
    #[error("no registered processor for identity {0}")]
    UnknownProcessor(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to bind API listener: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to connect to the bus")]
    BusUnavailable,
}

/// Everything the dispatch pipeline needs, frozen at start time.
///
/// Built once by [`Server::start`] and shared read-only by every transport;
/// registration happens strictly before that, so no lock guards the
/// processor table.
pub(crate) struct CoreState {
    pub(crate) model_managers: HashMap<u32, Arc<dyn ModelManager>>,
    pub(crate) unmarshallers: HashMap<String, Unmarshaller>,
    pub(crate) request_authenticators: Vec<Arc<dyn RequestAuthenticator>>,
    pub(crate) session_authenticators: Vec<Arc<dyn SessionAuthenticator>>,
    pub(crate) authorizers: Vec<Arc<dyn Authorizer>>,
    pub(crate) auditer: Option<Arc<dyn Auditer>>,
    pub(crate) session_handler: Option<Arc<dyn PushSessionHandler>>,
    pub(crate) read_only: bool,
    pub(crate) read_only_excluded: Vec<Identity>,
    pub(crate) trace_cleaner: Option<TraceCleaner>,
    pub(crate) disable_panic_recovery: bool,
    pub(crate) processor_finder: ProcessorFinder,
    pub(crate) pusher: Option<EventPusher>,
}

impl CoreState {
    pub(crate) fn manager(&self, version: u32) -> Option<Arc<dyn ModelManager>> {
        self.model_managers.get(&version).cloned()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        manager: Arc<dyn ModelManager>,
        processor_finder: ProcessorFinder,
    ) -> Self {
        let mut model_managers = HashMap::new();
        model_managers.insert(0, manager);
        Self {
            model_managers,
            unmarshallers: HashMap::new(),
            request_authenticators: Vec::new(),
            session_authenticators: Vec::new(),
            authorizers: Vec::new(),
            auditer: None,
            session_handler: None,
            read_only: false,
            read_only_excluded: Vec::new(),
            trace_cleaner: None,
            disable_panic_recovery: false,
            processor_finder,
            pusher: None,
        }
    }
}

/// A configured but not yet running server.
///
/// Collaborators that cannot travel through the config file attach here;
/// [`Server::start`] freezes everything and hands back a [`ServerHandle`].
pub struct Server {
    config: Config,
    model_managers: HashMap<u32, Arc<dyn ModelManager>>,
    unmarshallers: HashMap<String, Unmarshaller>,
    request_authenticators: Vec<Arc<dyn RequestAuthenticator>>,
    session_authenticators: Vec<Arc<dyn SessionAuthenticator>>,
    authorizers: Vec<Arc<dyn Authorizer>>,
    auditer: Option<Arc<dyn Auditer>>,
    session_handler: Option<Arc<dyn PushSessionHandler>>,
    pubsub: Option<Arc<dyn PubSub>>,
    trace_cleaner: Option<TraceCleaner>,
    health_check: Option<HealthCheck>,
    read_only_excluded: Vec<Identity>,
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            model_managers: HashMap::new(),
            unmarshallers: HashMap::new(),
            request_authenticators: Vec::new(),
            session_authenticators: Vec::new(),
            authorizers: Vec::new(),
            auditer: None,
            session_handler: None,
            pubsub: None,
            trace_cleaner: None,
            health_check: None,
            read_only_excluded: Vec::new(),
            processors: HashMap::new(),
        }
    }

    /// Install the model manager serving `version`.
    pub fn with_model_manager(mut self, version: u32, manager: Arc<dyn ModelManager>) -> Self {
        self.model_managers.insert(version, manager);
        self
    }

    /// Install a custom unmarshaller for one identity.
    pub fn with_unmarshaller(mut self, identity: &Identity, unmarshaller: Unmarshaller) -> Self {
        self.unmarshallers.insert(identity.name.clone(), unmarshaller);
        self
    }

    pub fn with_request_authenticators(
        mut self,
        authenticators: Vec<Arc<dyn RequestAuthenticator>>,
    ) -> Self {
        self.request_authenticators = authenticators;
        self
    }

    pub fn with_session_authenticators(
        mut self,
        authenticators: Vec<Arc<dyn SessionAuthenticator>>,
    ) -> Self {
        self.session_authenticators = authenticators;
        self
    }

    pub fn with_authorizers(mut self, authorizers: Vec<Arc<dyn Authorizer>>) -> Self {
        self.authorizers = authorizers;
        self
    }

    pub fn with_auditer(mut self, auditer: Arc<dyn Auditer>) -> Self {
        self.auditer = Some(auditer);
        self
    }

    pub fn with_session_handler(mut self, handler: Arc<dyn PushSessionHandler>) -> Self {
        self.session_handler = Some(handler);
        self
    }

    /// Attach the cluster bus adapter bridging push events across instances.
    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn with_trace_cleaner(mut self, cleaner: TraceCleaner) -> Self {
        self.trace_cleaner = Some(cleaner);
        self
    }

    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }

    /// Exempt identities from read-only mode, in addition to the names
    /// listed in the configuration.
    pub fn with_read_only_excluded(mut self, identities: Vec<Identity>) -> Self {
        self.read_only_excluded = identities;
        self
    }

    /// Register `processor` as the business logic for `identity`.
    /// Registration is one-to-one; a duplicate is an error.
    pub fn register_processor(
        &mut self,
        processor: Arc<dyn Processor>,
        identity: Identity,
    ) -> Result<(), ServerError> {
        if self.processors.contains_key(&identity.name) {
            return Err(ServerError::DuplicateProcessor(identity.name));
        }
        self.processors.insert(identity.name, processor);
        Ok(())
    }

    pub fn unregister_processor(&mut self, identity: &Identity) -> Result<(), ServerError> {
        if self.processors.remove(&identity.name).is_none() {
            return Err(ServerError::UnknownProcessor(identity.name.clone()));
        }
        Ok(())
    }

    pub fn processors_count(&self) -> usize {
        self.processors.len()
    }

    /// Validate, assemble, and launch the configured subsystems.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let shutdown = Shutdown::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if let Some(bus) = &self.pubsub {
            if !bus.connect().wait(None).await {
                return Err(ServerError::BusUnavailable);
            }
        }

        let push_handle = if self.config.push.disabled {
            None
        } else {
            let (push_server, handle) = PushServer::new(
                &self.config.push,
                self.session_handler.clone(),
                self.pubsub.clone(),
                shutdown.handle(),
            );
            tasks.push(tokio::spawn(push_server.run()));
            Some(handle)
        };

        let pusher: Option<EventPusher> = push_handle.clone().map(|handle| {
            Arc::new(move |event: Event| handle.push_event(event)) as EventPusher
        });

        let mut read_only_excluded = self.read_only_excluded;
        for name in &self.config.api.read_only_excluded {
            read_only_excluded.push(Identity::new(name.clone(), String::new()));
        }

        let processors = Arc::new(self.processors);
        let finder_processors = processors.clone();
        let processor_finder: ProcessorFinder =
            Arc::new(move |identity: &Identity| finder_processors.get(&identity.name).cloned());

        let core = Arc::new(CoreState {
            model_managers: self.model_managers,
            unmarshallers: self.unmarshallers,
            request_authenticators: self.request_authenticators,
            session_authenticators: self.session_authenticators,
            authorizers: self.authorizers,
            auditer: self.auditer,
            session_handler: self.session_handler,
            read_only: self.config.api.read_only,
            read_only_excluded,
            trace_cleaner: self.trace_cleaner,
            disable_panic_recovery: self.config.api.disable_panic_recovery,
            processor_finder,
            pusher,
        });

        let mut api_address = None;
        if !self.config.api.disabled {
            let semaphore = match self.config.api.max_concurrent_requests {
                0 => None,
                limit => Some(Arc::new(Semaphore::new(limit))),
            };
            let state = AppState {
                core: core.clone(),
                push: push_handle.clone(),
                semaphore,
                health: self.health_check,
            };

            let listener = TcpListener::bind(&self.config.api.listen_address).await?;
            api_address = Some(listener.local_addr()?);

            let api_server = ApiServer::new(&self.config.api, state);
            let api_shutdown = shutdown.handle();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = api_server.run(listener, api_shutdown).await {
                    tracing::error!(error = %e, "API server failed");
                }
            }));
        }

        Ok(ServerHandle {
            shutdown,
            push: push_handle,
            api_address,
            tasks,
        })
    }
}

/// Handle on a running server.
#[derive(Debug)]
pub struct ServerHandle {
    shutdown: Shutdown,
    push: Option<PushServerHandle>,
    api_address: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// The bound API address, useful with an ephemeral listen port.
    pub fn api_address(&self) -> Option<SocketAddr> {
        self.api_address
    }

    /// Hand a domain event to the push subsystem. No-op when push is
    /// disabled.
    pub fn push(&self, event: Event) {
        if let Some(push) = &self.push {
            push.push_event(event);
        }
    }

    pub fn push_events(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push(event);
        }
    }

    /// Graceful stop: all sessions are torn down and every subsystem task
    /// joins before this returns.
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Processor;
    use crate::testmodel;

    struct Noop;
    impl Processor for Noop {}

    #[test]
    fn processor_registration_is_one_to_one() {
        let mut server = Server::new(Config::default());
        server
            .register_processor(Arc::new(Noop), testmodel::user_identity())
            .unwrap();
        assert_eq!(server.processors_count(), 1);

        let err = server
            .register_processor(Arc::new(Noop), testmodel::user_identity())
            .unwrap_err();
        assert!(matches!(err, ServerError::DuplicateProcessor(name) if name == "user"));

        server.unregister_processor(&testmodel::user_identity()).unwrap();
        assert_eq!(server.processors_count(), 0);
        assert!(server
            .unregister_processor(&testmodel::user_identity())
            .is_err());
    }

    #[tokio::test]
    async fn start_validates_the_config() {
        let mut config = Config::default();
        config.api.listen_address = "nowhere".to_string();
        let err = Server::new(config).start().await.unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[tokio::test]
    async fn start_and_stop_roundtrip() {
        let mut config = Config::default();
        config.api.listen_address = "127.0.0.1:0".to_string();

        let server =
            Server::new(config).with_model_manager(0, testmodel::manager());
        let handle = server.start().await.unwrap();
        assert!(handle.api_address().is_some());
        handle.stop().await;
    }
}
