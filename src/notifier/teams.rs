//! Microsoft Teams incoming webhook notifier.
//!
//! Alerts are rendered as legacy Office 365 `MessageCard`s. The connector
//! answers a successful post with the literal body `1`; anything else is a
//! rejection.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::{Alert, Notifier};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const CARD_CONTEXT: &str = "http://schema.org/extensions";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("cannot send alert to Teams, MS_TEAMS_WEBHOOK is not set")]
    MissingWebhook,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Teams webhook returned {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[derive(Debug, Serialize)]
pub struct MessageCard {
    #[serde(rename = "@type")]
    typ: &'static str,
    #[serde(rename = "@context")]
    context: &'static str,
    summary: String,
    #[serde(rename = "themeColor")]
    theme_color: &'static str,
    title: String,
    sections: Vec<CardSection>,
}

#[derive(Debug, Serialize)]
struct CardSection {
    #[serde(rename = "activityTitle")]
    activity_title: String,
    #[serde(rename = "activitySubtitle")]
    activity_subtitle: String,
    #[serde(rename = "activityImage")]
    activity_image: String,
    facts: Vec<CardFact>,
}

#[derive(Debug, Serialize)]
struct CardFact {
    name: String,
    value: String,
}

impl MessageCard {
    /// Facts start with the host name, followed by the alert attributes in key order.
    pub fn from_alert(alert: &Alert, summary: &str, hostname: &str) -> Self {
        let facts = std::iter::once(CardFact {
            name: "Hostname".to_string(),
            value: hostname.to_string(),
        })
        .chain(alert.attributes.iter().map(|(name, value)| CardFact {
            name: name.clone(),
            value: value.clone(),
        }))
        .collect();

        let headline = alert.headline();
        MessageCard {
            typ: "MessageCard",
            context: CARD_CONTEXT,
            summary: summary.to_string(),
            theme_color: alert.severity.color(),
            title: headline.clone(),
            sections: vec![CardSection {
                activity_title: headline,
                activity_subtitle: alert.subtitle.clone(),
                activity_image: String::new(),
                facts,
            }],
        }
    }
}

struct TeamsInner {
    client: reqwest::Client,
    webhook: Option<String>,
    summary: String,
    hostname: String,
}

#[derive(Clone)]
pub struct TeamsNotifier {
    inner: Arc<TeamsInner>,
}

impl TeamsNotifier {
    pub fn new(
        webhook: Option<String>,
        summary: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        if webhook.is_none() {
            log::warn!("MS_TEAMS_WEBHOOK is not set, every alert will fail to deliver");
        }
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            inner: Arc::new(TeamsInner {
                client,
                webhook,
                summary: summary.into(),
                hostname: hostname.into(),
            }),
        })
    }

    pub async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let inner = &self.inner;
        let webhook = inner.webhook.as_deref().ok_or(NotifyError::MissingWebhook)?;
        let card = MessageCard::from_alert(alert, &inner.summary, &inner.hostname);

        let response = inner.client.post(webhook).json(&card).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() || body != "1" {
            return Err(NotifyError::Rejected { status, body });
        }
        Ok(())
    }
}

impl Notifier for TeamsNotifier {
    fn notify(&self, alert: Alert) {
        let notifier = self.clone();
        tokio::spawn(async move {
            match notifier.send(&alert).await {
                Ok(()) => log::debug!("Delivered alert '{}'", alert.headline()),
                Err(e) => log::error!("Failed to deliver alert '{}': {e}", alert.headline()),
            }
        });
    }
}

/// Host name for the card facts, empty when it cannot be determined.
pub fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            log::warn!("Unable to read the host name: {e}");
            String::new()
        }
    }
}
