//! Wires the Docker event source, the dispatcher and the notifier together.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::{ConfigError, SentinelConfig};
use crate::dispatcher::{Dispatcher, seed_attributes};
use crate::docker::{self, DockerEventSource, DockerLogSource};
use crate::event::LifecycleEvent;
use crate::logwatch::LogSource;
use crate::notifier::teams::{NotifyError, local_hostname};
use crate::notifier::{Notifier, TeamsNotifier};

pub type EventReceiver = mpsc::UnboundedReceiver<Result<LifecycleEvent, bollard::errors::Error>>;

#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),
    #[error("Docker event stream failed: {0}")]
    EventStream(bollard::errors::Error),
    #[error("Docker event stream closed")]
    EventStreamClosed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifyError),
}

pub async fn run(config: SentinelConfig, shutdown: oneshot::Receiver<()>) -> Result<(), SentinelError> {
    let docker = docker::connect()?;
    let notifier: Arc<dyn Notifier> = Arc::new(TeamsNotifier::new(
        config.webhook.clone(),
        config.card_subject.clone(),
        local_hostname(),
    )?);

    let source = DockerEventSource::new(docker.clone());
    let mut dispatcher = Dispatcher::new(
        config.dispatcher_config(),
        DockerLogSource::new(docker),
        notifier,
    );

    // Subscribe first so containers starting during the listing are not missed.
    let events = source.spawn_subscription();

    if config.stderr_service.is_empty() {
        log::info!("No STDERR_SERVICE configured, stderr forwarding is off");
    } else {
        let containers = source.monitored_containers(&config.stderr_service).await?;
        log::info!(
            "Found {} running containers of {}",
            containers.len(),
            config.stderr_service
        );
        for (id, labels) in containers {
            let attributes = seed_attributes(&id, labels);
            dispatcher.watches().start_watch(&id, &attributes);
        }
        log::info!("Watching stderr of {} containers", dispatcher.watches().len());
    }

    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);
    log::info!("Watching Docker events");

    consume(events, &mut dispatcher, shutdown).await
}

/// Feed events to the dispatcher one at a time, in arrival order.
///
/// Returns `Ok` only on shutdown. Any failure of the event stream, including
/// its end, is fatal: the supervisor restarts us with empty state.
pub async fn consume<S: LogSource>(
    mut events: EventReceiver,
    dispatcher: &mut Dispatcher<S>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), SentinelError> {
    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutting down");
                break Ok(());
            }
            event = events.recv() => match event {
                Some(Ok(event)) => dispatcher.dispatch(event),
                Some(Err(e)) => break Err(SentinelError::EventStream(e)),
                None => break Err(SentinelError::EventStreamClosed),
            },
        }
    };
    if !dispatcher.watches().is_empty() {
        log::info!("Stopping {} log watches", dispatcher.watches().len());
        dispatcher.watches().stop_all();
    }
    result
}
