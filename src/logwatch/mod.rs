//! One background tailing task per monitored container.
//!
//! The manager lives inside the dispatcher and is only driven from the event
//! loop. Each watch task owns its stream and a handle to the notifier; the
//! registry only keeps what is needed to cancel it.

pub mod framing;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use framing::LogFraming;
use framing::FrameDecoder;

use crate::event::resolve_service_name;
use crate::notifier::{Alert, Notifier, Severity};

#[derive(Debug, thiserror::Error)]
pub enum LogSourceError {
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where container stderr comes from.
pub trait LogSource: Send + Sync {
    /// Framing of the bytes yielded by [`LogSource::open`].
    fn framing(&self) -> LogFraming;

    /// Follow the container's stderr from now on, without replaying history.
    fn open(&self, container_id: &str) -> BoxStream<'static, Result<Bytes, LogSourceError>>;
}

/// Cancellation side of a running watch.
pub struct WatchHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Ask the task to stop. It exits at its next await point.
    pub fn cancel(self) {
        let _ = self.cancel.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct LogWatchManager<S> {
    source: S,
    notifier: Arc<dyn Notifier>,
    watches: HashMap<String, WatchHandle>,
}

impl<S: LogSource> LogWatchManager<S> {
    pub fn new(source: S, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            source,
            notifier,
            watches: HashMap::new(),
        }
    }

    /// Returns `false` when the container is already watched.
    pub fn start_watch(&mut self, container_id: &str, attributes: &HashMap<String, String>) -> bool {
        if self.is_watching(container_id) {
            return false;
        }

        let stream = self.source.open(container_id);
        let (cancel, cancelled) = oneshot::channel();
        let task = tokio::spawn(watch_logs(
            container_id.to_string(),
            stream,
            self.source.framing(),
            Arc::clone(&self.notifier),
            attributes.clone(),
            cancelled,
        ));

        log::info!(
            "Watching stderr of {} ({container_id})",
            resolve_service_name(attributes)
        );
        self.watches
            .insert(container_id.to_string(), WatchHandle { cancel, task });
        true
    }

    /// Returns `false` when nothing was watched for this container.
    pub fn stop_watch(&mut self, container_id: &str) -> bool {
        match self.watches.remove(container_id) {
            Some(handle) => {
                if handle.is_finished() {
                    log::debug!("Log stream of {container_id} had already ended");
                }
                handle.cancel();
                log::info!("Stopped watching stderr of {container_id}");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        for (_, handle) in self.watches.drain() {
            handle.cancel();
        }
    }

    pub fn is_watching(&self, container_id: &str) -> bool {
        self.watches.contains_key(container_id)
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}

impl<S> Drop for LogWatchManager<S> {
    fn drop(&mut self) {
        for (_, handle) in self.watches.drain() {
            handle.cancel();
        }
    }
}

/// A dropped sender counts as cancellation too.
fn is_cancelled(cancelled: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        cancelled.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}

async fn watch_logs(
    container_id: String,
    mut stream: BoxStream<'static, Result<Bytes, LogSourceError>>,
    framing: LogFraming,
    notifier: Arc<dyn Notifier>,
    attributes: HashMap<String, String>,
    mut cancelled: oneshot::Receiver<()>,
) {
    let service = resolve_service_name(&attributes).to_string();
    let mut decoder = FrameDecoder::new(framing);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = &mut cancelled => {
                log::debug!("Log watch for {container_id} cancelled");
                return;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => decoder.push(&bytes),
            Some(Err(e)) => {
                log::debug!("Log stream for {container_id} failed: {e}");
                return;
            }
            None => {
                log::debug!("Log stream for {container_id} ended");
                return;
            }
        }

        loop {
            match decoder.next_message() {
                Ok(Some(message)) if message.is_empty() => {}
                Ok(Some(message)) => {
                    if is_cancelled(&mut cancelled) {
                        log::debug!("Log watch for {container_id} cancelled");
                        return;
                    }
                    notifier.notify(Alert::new(
                        Severity::Alert,
                        service.as_str(),
                        format!("logged {message}"),
                        &attributes,
                    ));
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("Dropping log watch for {container_id}: {e}");
                    return;
                }
            }
        }
    }
}
