pub mod teams;

use std::collections::{BTreeMap, HashMap};

pub use teams::TeamsNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Something broke.
    Alert,
    /// Something recovered.
    Ok,
}

impl Severity {
    /// Card theme color as a hex string without the leading `#`.
    pub fn color(self) -> &'static str {
        match self {
            Severity::Alert => "ff5864",
            Severity::Ok => "90ee90",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub severity: Severity,
    /// Usually the service name.
    pub title: String,
    pub subtitle: String,
    /// Sorted by key so cards render deterministically.
    pub attributes: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(
        severity: Severity,
        title: impl Into<String>,
        subtitle: impl Into<String>,
        attributes: &HashMap<String, String>,
    ) -> Self {
        Self {
            severity,
            title: title.into(),
            subtitle: subtitle.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn headline(&self) -> String {
        format!("{} {}", self.title, self.subtitle)
    }
}

/// Best-effort alert sink.
///
/// `notify` must return immediately. Delivery happens elsewhere and its
/// failures are reported by the implementation itself.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: Alert);
}
