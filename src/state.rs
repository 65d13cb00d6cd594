//! In-memory dedup state.
//!
//! Owned exclusively by the dispatcher and only touched from the event loop,
//! so nothing in here is synchronized. Everything is lost on restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Repeated death alerts for one service are dropped inside this window.
pub const DEATH_DEBOUNCE_WINDOW: Duration = Duration::from_secs(120);
/// A `die` this long after a rolling update started is no longer attributed to it.
pub const UPDATE_GRACE_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathVerdict {
    Alert,
    /// Another container of the service already alerted inside the window.
    Debounced,
    /// Expected restart caused by a rolling update.
    UpdateRestart,
}

#[derive(Debug, Default)]
pub struct DedupState {
    /// container id -> should a `healthy` transition alert
    health_visibility: HashMap<String, bool>,
    /// service id -> last emitted death alert
    death_debounce: HashMap<String, Instant>,
    /// service id -> when the running rolling update started
    update_windows: HashMap<String, Instant>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container_started(&mut self, container_id: &str) {
        self.health_visibility.insert(container_id.to_string(), false);
    }

    pub fn container_unhealthy(&mut self, container_id: &str) {
        self.health_visibility.insert(container_id.to_string(), true);
    }

    /// A container we never saw start is treated as visible.
    pub fn should_alert_healthy(&self, container_id: &str) -> bool {
        self.health_visibility
            .get(container_id)
            .copied()
            .unwrap_or(true)
    }

    pub fn update_started(&mut self, service_id: &str, now: Instant) {
        self.update_windows.insert(service_id.to_string(), now);
    }

    pub fn update_finished(&mut self, service_id: &str) {
        self.update_windows.remove(service_id);
    }

    pub fn is_updating(&self, service_id: &str) -> bool {
        self.update_windows.contains_key(service_id)
    }

    /// Decide what a non-zero exit of one of the service's containers means.
    ///
    /// The debounce timestamp only moves when the verdict is `Alert`. With
    /// `update_aware` an exit code of `1` inside a young update window
    /// consumes that window.
    pub fn container_failed(
        &mut self,
        service_id: &str,
        exit_code: &str,
        update_aware: bool,
        now: Instant,
    ) -> DeathVerdict {
        if update_aware && exit_code == "1" {
            if let Some(started) = self.update_windows.get(service_id) {
                if now.saturating_duration_since(*started) < UPDATE_GRACE_WINDOW {
                    self.update_windows.remove(service_id);
                    return DeathVerdict::UpdateRestart;
                }
            }
        }

        match self.death_debounce.get(service_id) {
            Some(last) if now.saturating_duration_since(*last) <= DEATH_DEBOUNCE_WINDOW => {
                DeathVerdict::Debounced
            }
            Some(_) | None => {
                self.death_debounce.insert(service_id.to_string(), now);
                DeathVerdict::Alert
            }
        }
    }

    #[cfg(test)]
    pub fn last_death_alert(&self, service_id: &str) -> Option<Instant> {
        self.death_debounce.get(service_id).copied()
    }
}
