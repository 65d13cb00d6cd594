//! Turns the raw event stream into alerts.
//!
//! Docker delivers every lifecycle change, at least once and with plenty of
//! noise. The dispatcher keeps just enough state to report a service death
//! once per window, to report recoveries only after a failure was reported,
//! and to stay quiet while swarm is rolling out a new version of a service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::event::{
    CONTAINER_ID_ATTR, EXIT_CODE_ATTR, EventKind, LifecycleEvent, SERVICE_ID_ATTR,
    UPDATE_STATE_NEW_ATTR, resolve_service_id, resolve_service_name,
};
use crate::logwatch::{LogSource, LogWatchManager};
use crate::notifier::{Alert, Notifier, Severity};
use crate::state::{DeathVerdict, DedupState};

const ACTION_START: &str = "start";
const ACTION_DIE: &str = "die";
const ACTION_UNHEALTHY: &str = "health_status: unhealthy";
const ACTION_HEALTHY: &str = "health_status: healthy";
const ACTION_UPDATE: &str = "update";
const UPDATE_STATE_UPDATING: &str = "updating";

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Containers of this service get their stderr watched. Empty disables it.
    pub stderr_service: String,
    /// Ignore `die` events caused by rolling updates.
    pub update_aware: bool,
}

pub struct Dispatcher<S> {
    config: DispatcherConfig,
    state: DedupState,
    watches: LogWatchManager<S>,
    notifier: Arc<dyn Notifier>,
}

impl<S: LogSource> Dispatcher<S> {
    pub fn new(config: DispatcherConfig, log_source: S, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            state: DedupState::new(),
            watches: LogWatchManager::new(log_source, Arc::clone(&notifier)),
            notifier,
        }
    }

    pub fn watches(&mut self) -> &mut LogWatchManager<S> {
        &mut self.watches
    }

    pub fn dispatch(&mut self, event: LifecycleEvent) {
        self.dispatch_at(event, Instant::now());
    }

    pub fn dispatch_at(&mut self, mut event: LifecycleEvent, now: Instant) {
        match event.kind {
            EventKind::Service if event.action == ACTION_UPDATE => {
                self.on_service_update(&event, now);
            }
            EventKind::Container => {
                event
                    .attributes
                    .insert(CONTAINER_ID_ATTR.to_string(), event.actor_id.clone());
                match event.action.as_str() {
                    ACTION_START => self.on_start(&event),
                    ACTION_UNHEALTHY => self.on_unhealthy(&event),
                    ACTION_HEALTHY => self.on_healthy(&event),
                    ACTION_DIE => self.on_die(&event, now),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn on_service_update(&mut self, event: &LifecycleEvent, now: Instant) {
        // Service events carry the service id as the actor.
        let service_id = match event.attribute(SERVICE_ID_ATTR) {
            Some(id) => id,
            None => event.actor_id.as_str(),
        };
        let name = event.attribute("name").unwrap_or(service_id);

        match event.attribute(UPDATE_STATE_NEW_ATTR) {
            Some(UPDATE_STATE_UPDATING) => {
                log::info!("Service {name} is updating, expecting restarts");
                self.state.update_started(service_id, now);
            }
            new_state => {
                if self.state.is_updating(service_id) {
                    log::info!(
                        "Service {name} update left the updating state ({})",
                        new_state.unwrap_or("unknown")
                    );
                }
                self.state.update_finished(service_id);
            }
        }
    }

    fn on_start(&mut self, event: &LifecycleEvent) {
        self.state.container_started(&event.actor_id);

        let service = resolve_service_name(&event.attributes);
        if !self.config.stderr_service.is_empty() && service == self.config.stderr_service {
            self.watches.start_watch(&event.actor_id, &event.attributes);
        }
    }

    fn on_unhealthy(&mut self, event: &LifecycleEvent) {
        self.state.container_unhealthy(&event.actor_id);
        self.alert(Severity::Alert, "unhealthy (running)", event);
    }

    fn on_healthy(&mut self, event: &LifecycleEvent) {
        if self.state.should_alert_healthy(&event.actor_id) {
            self.alert(Severity::Ok, "ok", event);
        } else {
            log::debug!("Container {} is healthy", event.actor_id);
        }
    }

    fn on_die(&mut self, event: &LifecycleEvent, now: Instant) {
        self.watches.stop_watch(&event.actor_id);

        let exit_code = event.attribute(EXIT_CODE_ATTR).unwrap_or_default();
        if exit_code == "0" {
            return;
        }

        let service_id = resolve_service_id(&event.attributes);
        match self
            .state
            .container_failed(service_id, exit_code, self.config.update_aware, now)
        {
            DeathVerdict::Alert => {
                self.alert(
                    Severity::Alert,
                    &format!("died (exited with code {exit_code})"),
                    event,
                );
            }
            DeathVerdict::Debounced => log::debug!(
                "Suppressed death of {} ({}), service {service_id:?} already reported",
                resolve_service_name(&event.attributes),
                event.actor_id
            ),
            DeathVerdict::UpdateRestart => log::info!(
                "Container {} of {} exited during a rolling update",
                event.actor_id,
                resolve_service_name(&event.attributes)
            ),
        }
    }

    fn alert(&self, severity: Severity, subtitle: &str, event: &LifecycleEvent) {
        let service = resolve_service_name(&event.attributes);
        log::info!("{service} {subtitle}");
        self.notifier
            .notify(Alert::new(severity, service, subtitle, &event.attributes));
    }
}

/// Attributes of a container found at startup, shaped like event attributes.
pub fn seed_attributes(container_id: &str, labels: HashMap<String, String>) -> HashMap<String, String> {
    let mut attributes = labels;
    attributes.insert(CONTAINER_ID_ATTR.to_string(), container_id.to_string());
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{IMAGE_ATTR, SERVICE_NAME_ATTR};
    use crate::logwatch::LogFraming;
    use crate::logwatch::testing::ChannelLogSource;
    use crate::notifier::testing::RecordingNotifier;
    use std::time::Duration;

    struct Harness {
        dispatcher: Dispatcher<ChannelLogSource>,
        notifier: Arc<RecordingNotifier>,
        t0: Instant,
    }

    impl Harness {
        fn new(update_aware: bool) -> Self {
            let notifier = Arc::new(RecordingNotifier::default());
            let config = DispatcherConfig {
                stderr_service: "api".to_string(),
                update_aware,
            };
            let dispatcher = Dispatcher::new(
                config,
                ChannelLogSource::new(LogFraming::Lines),
                notifier.clone(),
            );
            Self {
                dispatcher,
                notifier,
                t0: Instant::now(),
            }
        }

        fn send(&mut self, event: LifecycleEvent, after: Duration) {
            self.dispatcher.dispatch_at(event, self.t0 + after);
        }

        fn subtitles(&self) -> Vec<String> {
            self.notifier.subtitles()
        }
    }

    fn container(action: &str, id: &str, service: &str, extra: &[(&str, &str)]) -> LifecycleEvent {
        let mut attributes = HashMap::new();
        attributes.insert(SERVICE_NAME_ATTR.to_string(), service.to_string());
        attributes.insert(SERVICE_ID_ATTR.to_string(), format!("{service}-id"));
        attributes.insert(IMAGE_ATTR.to_string(), format!("{service}:latest"));
        for (k, v) in extra {
            attributes.insert(k.to_string(), v.to_string());
        }
        LifecycleEvent::new(EventKind::Container, action, id, attributes)
    }

    fn die(id: &str, service: &str, code: &str) -> LifecycleEvent {
        container(ACTION_DIE, id, service, &[(EXIT_CODE_ATTR, code)])
    }

    fn service_update(service: &str, new_state: &str) -> LifecycleEvent {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), service.to_string());
        attributes.insert(UPDATE_STATE_NEW_ATTR.to_string(), new_state.to_string());
        LifecycleEvent::new(EventKind::Service, ACTION_UPDATE, format!("{service}-id"), attributes)
    }

    #[tokio::test]
    async fn test_unhealthy_then_healthy() {
        let mut h = Harness::new(true);
        h.send(container(ACTION_START, "c1", "web", &[]), Duration::ZERO);
        h.send(container(ACTION_UNHEALTHY, "c1", "web", &[]), Duration::from_secs(1));
        h.send(container(ACTION_HEALTHY, "c1", "web", &[]), Duration::from_secs(2));

        assert_eq!(h.subtitles(), vec!["unhealthy (running)", "ok"]);
        let alerts = h.notifier.alerts();
        assert_eq!(alerts[0].severity, Severity::Alert);
        assert_eq!(alerts[1].severity, Severity::Ok);
        assert_eq!(alerts[1].title, "web");
        assert_eq!(
            alerts[1].attributes.get(CONTAINER_ID_ATTR).map(String::as_str),
            Some("c1")
        );
    }

    #[tokio::test]
    async fn test_healthy_after_start_is_quiet() {
        let mut h = Harness::new(true);
        h.send(container(ACTION_START, "c1", "web", &[]), Duration::ZERO);
        h.send(container(ACTION_HEALTHY, "c1", "web", &[]), Duration::from_secs(30));
        assert!(h.subtitles().is_empty());
    }

    #[tokio::test]
    async fn test_healthy_for_unseen_container_alerts() {
        let mut h = Harness::new(true);
        h.send(container(ACTION_HEALTHY, "c9", "web", &[]), Duration::ZERO);
        assert_eq!(h.subtitles(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_unhealthy_always_alerts() {
        let mut h = Harness::new(true);
        for i in 0..3 {
            h.send(container(ACTION_UNHEALTHY, "c1", "web", &[]), Duration::from_secs(i));
        }
        h.send(container(ACTION_HEALTHY, "c1", "web", &[]), Duration::from_secs(4));
        h.send(container(ACTION_HEALTHY, "c1", "web", &[]), Duration::from_secs(5));
        assert_eq!(
            h.subtitles(),
            vec![
                "unhealthy (running)",
                "unhealthy (running)",
                "unhealthy (running)",
                "ok",
                "ok"
            ]
        );
    }

    #[tokio::test]
    async fn test_deaths_within_window_alert_once() {
        let mut h = Harness::new(true);
        h.send(die("c1", "web", "1"), Duration::ZERO);
        h.send(die("c2", "web", "1"), Duration::from_secs(10));
        assert_eq!(h.subtitles(), vec!["died (exited with code 1)"]);
    }

    #[tokio::test]
    async fn test_deaths_outside_window_alert_twice() {
        let mut h = Harness::new(true);
        h.send(die("c1", "web", "1"), Duration::ZERO);
        h.send(die("c2", "web", "1"), Duration::from_secs(180));
        assert_eq!(
            h.subtitles(),
            vec!["died (exited with code 1)", "died (exited with code 1)"]
        );
    }

    #[tokio::test]
    async fn test_clean_exit_is_ignored() {
        let mut h = Harness::new(true);
        h.send(die("c1", "web", "0"), Duration::ZERO);
        assert!(h.subtitles().is_empty());
        // A clean exit does not open a debounce window.
        h.send(die("c2", "web", "137"), Duration::from_secs(1));
        assert_eq!(h.subtitles(), vec!["died (exited with code 137)"]);
    }

    #[tokio::test]
    async fn test_update_restart_is_suppressed() {
        let mut h = Harness::new(true);
        h.send(service_update("web", "updating"), Duration::ZERO);
        h.send(die("c1", "web", "1"), Duration::from_secs(30));
        assert!(h.subtitles().is_empty());
        assert!(!h.dispatcher.state.is_updating("web-id"));

        // Nothing left to consume, normal debounce applies.
        h.send(die("c2", "web", "1"), Duration::from_secs(31));
        assert_eq!(h.subtitles(), vec!["died (exited with code 1)"]);
    }

    #[tokio::test]
    async fn test_update_completed_clears_window() {
        let mut h = Harness::new(true);
        h.send(service_update("web", "updating"), Duration::ZERO);
        h.send(service_update("web", "completed"), Duration::from_secs(5));
        h.send(die("c1", "web", "1"), Duration::from_secs(10));
        assert_eq!(h.subtitles(), vec!["died (exited with code 1)"]);
    }

    #[tokio::test]
    async fn test_update_window_disabled() {
        let mut h = Harness::new(false);
        h.send(service_update("web", "updating"), Duration::ZERO);
        h.send(die("c1", "web", "1"), Duration::from_secs(30));
        assert_eq!(h.subtitles(), vec!["died (exited with code 1)"]);
    }

    #[tokio::test]
    async fn test_update_events_never_alert() {
        let mut h = Harness::new(true);
        h.send(service_update("web", "updating"), Duration::ZERO);
        h.send(service_update("web", "rollback_started"), Duration::from_secs(1));
        assert!(h.subtitles().is_empty());
    }

    #[tokio::test]
    async fn test_missing_service_id_shares_bucket() {
        let mut h = Harness::new(true);
        let plain = |id: &str, image: &str| {
            let mut attributes = HashMap::new();
            attributes.insert(IMAGE_ATTR.to_string(), image.to_string());
            attributes.insert(EXIT_CODE_ATTR.to_string(), "2".to_string());
            LifecycleEvent::new(EventKind::Container, ACTION_DIE, id, attributes)
        };
        h.send(plain("c1", "redis"), Duration::ZERO);
        h.send(plain("c2", "postgres"), Duration::from_secs(5));

        let alerts = h.notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "redis");
    }

    #[tokio::test]
    async fn test_monitored_service_gets_log_watch() {
        let mut h = Harness::new(true);
        h.send(container(ACTION_START, "c1", "api", &[]), Duration::ZERO);
        h.send(container(ACTION_START, "c2", "web", &[]), Duration::ZERO);
        assert!(h.dispatcher.watches().is_watching("c1"));
        assert!(!h.dispatcher.watches().is_watching("c2"));

        h.send(die("c1", "api", "0"), Duration::from_secs(1));
        assert!(!h.dispatcher.watches().is_watching("c1"));
        // Unknown container dying is fine.
        h.send(die("c2", "web", "0"), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_stderr_service_never_watches() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut dispatcher = Dispatcher::new(
            DispatcherConfig::default(),
            ChannelLogSource::new(LogFraming::Lines),
            notifier,
        );
        // No service name and no image resolves to "", which must not match.
        dispatcher.dispatch(LifecycleEvent::new(
            EventKind::Container,
            ACTION_START,
            "c1",
            HashMap::new(),
        ));
        assert!(dispatcher.watches().is_empty());
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let mut h = Harness::new(true);
        h.send(
            LifecycleEvent::new(EventKind::Other, ACTION_DIE, "x", HashMap::new()),
            Duration::ZERO,
        );
        h.send(container("exec_start: sh", "c1", "web", &[]), Duration::ZERO);
        h.send(service_update("web", "updating"), Duration::ZERO);
        let mut create = service_update("web", "updating");
        create.action = "create".to_string();
        h.send(create, Duration::ZERO);
        assert!(h.subtitles().is_empty());
    }

    #[test]
    fn test_seed_attributes() {
        let mut labels = HashMap::new();
        labels.insert(SERVICE_NAME_ATTR.to_string(), "api".to_string());
        let attributes = seed_attributes("c1", labels);
        assert_eq!(attributes.get(CONTAINER_ID_ATTR).map(String::as_str), Some("c1"));
        assert_eq!(resolve_service_name(&attributes), "api");
    }
}
