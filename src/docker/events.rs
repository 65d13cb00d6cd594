use std::collections::HashMap;

use bollard::Docker;
use bollard::query_parameters::{
    EventsOptions, EventsOptionsBuilder, ListContainersOptions, ListContainersOptionsBuilder,
};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::event::{LifecycleEvent, SERVICE_NAME_ATTR};

/// Lifecycle events and container listings from the daemon.
#[derive(Clone)]
pub struct DockerEventSource {
    docker: Docker,
}

impl DockerEventSource {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Every event from now on, unfiltered. An error item is fatal.
    pub fn subscribe(&self) -> BoxStream<'static, Result<LifecycleEvent, bollard::errors::Error>> {
        let options: EventsOptions = EventsOptionsBuilder::new().build();
        self.docker
            .events(Some(options))
            .map(|msg| msg.map(LifecycleEvent::from))
            .boxed()
    }

    /// Start consuming the event stream right away on a separate task.
    ///
    /// The channel is unbounded, events are buffered as fast as the daemon
    /// produces them. The first error is forwarded and ends the subscription.
    pub fn spawn_subscription(&self) -> mpsc::UnboundedReceiver<Result<LifecycleEvent, bollard::errors::Error>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = self.subscribe();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let failed = item.is_err();
                if tx.send(item).is_err() || failed {
                    break;
                }
            }
        });
        rx
    }

    /// Running containers belonging to the swarm service `service_name`,
    /// as `(id, labels)` pairs.
    pub async fn monitored_containers(
        &self,
        service_name: &str,
    ) -> Result<Vec<(String, HashMap<String, String>)>, bollard::errors::Error> {
        let filters = HashMap::from([(
            "label",
            vec![format!("{SERVICE_NAME_ATTR}={service_name}")],
        )]);
        let options: ListContainersOptions =
            ListContainersOptionsBuilder::new().filters(&filters).build();

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|summary| Some((summary.id?, summary.labels.unwrap_or_default())))
            .collect())
    }
}
