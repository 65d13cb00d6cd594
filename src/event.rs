//! Lifecycle events as seen by the dispatcher.
//!
//! The Docker daemon reports events as loosely typed messages where every
//! field is optional. They are normalized into [`LifecycleEvent`] right at
//! the boundary so the rest of the crate never deals with `Option`s.

use std::collections::HashMap;

use bollard::models::{EventMessage, EventMessageTypeEnum};

/// Label set by swarm on every task container with the service name.
pub const SERVICE_NAME_ATTR: &str = "com.docker.swarm.service.name";
/// Label set by swarm on every task container with the service id.
pub const SERVICE_ID_ATTR: &str = "com.docker.swarm.service.id";
pub const IMAGE_ATTR: &str = "image";
pub const EXIT_CODE_ATTR: &str = "exitCode";
pub const UPDATE_STATE_NEW_ATTR: &str = "updatestate.new";
/// Injected by the dispatcher so alerts always carry the container id.
pub const CONTAINER_ID_ATTR: &str = "container_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Container,
    Service,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub action: String,
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
}

impl LifecycleEvent {
    pub fn new(
        kind: EventKind,
        action: impl Into<String>,
        actor_id: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            kind,
            action: action.into(),
            actor_id: actor_id.into(),
            attributes,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl From<EventMessage> for LifecycleEvent {
    fn from(msg: EventMessage) -> Self {
        let kind = match msg.typ {
            Some(EventMessageTypeEnum::CONTAINER) => EventKind::Container,
            Some(EventMessageTypeEnum::SERVICE) => EventKind::Service,
            _ => EventKind::Other,
        };
        let (actor_id, attributes) = match msg.actor {
            Some(actor) => (
                actor.id.unwrap_or_default(),
                actor.attributes.unwrap_or_default(),
            ),
            None => (String::new(), HashMap::new()),
        };
        Self::new(kind, msg.action.unwrap_or_default(), actor_id, attributes)
    }
}

/// The swarm service name, falling back to the image for plain containers.
pub fn resolve_service_name(attributes: &HashMap<String, String>) -> &str {
    attributes
        .get(SERVICE_NAME_ATTR)
        .or_else(|| attributes.get(IMAGE_ATTR))
        .map(String::as_str)
        .unwrap_or_default()
}

/// The swarm service id, or `""` when the container is not a swarm task.
///
/// Every container without the label shares the empty key, so their death
/// alerts are debounced together.
pub fn resolve_service_id(attributes: &HashMap<String, String>) -> &str {
    attributes
        .get(SERVICE_ID_ATTR)
        .map(String::as_str)
        .unwrap_or_default()
}
