//! Admin notification.
//!
//! The notification channel is the only proactive (non-polled) failure
//! surface. Delivery failures are logged and swallowed: a broken webhook
//! must never stall admission control or fail a caller.

use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{QueueName, TaskId};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook delivery failed: {0}")]
    Webhook(#[from] reqwest::Error),
}

/// Structured alert payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A task waited in queue past the admission deadline.
    TaskTimeout {
        task_id: TaskId,
        queue: QueueName,
        waited_secs: f64,
    },

    /// A task reached FAILURE (retries exhausted or non-retryable).
    TaskFailure { task_id: TaskId, error: String },
}

impl NotifyEvent {
    fn summary(&self) -> String {
        match self {
            NotifyEvent::TaskTimeout {
                task_id,
                queue,
                waited_secs,
            } => format!("task {task_id} timed out after {waited_secs:.1}s in queue {queue}"),
            NotifyEvent::TaskFailure { task_id, error } => {
                format!("task {task_id} failed: {error}")
            }
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotifyEvent) -> Result<(), NotifyError>;
}

/// POSTs the event as JSON to the configured admin webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        info!("webhook notification sent to {}", self.url);
        Ok(())
    }
}

/// Email channel. No mail transport is wired up yet, so delivery is a log
/// line carrying the would-be recipient and subject.
/// TODO: plug in an SMTP client once ops settles on a relay.
pub struct EmailNotifier {
    to: String,
}

impl EmailNotifier {
    pub fn new(to: impl Into<String>) -> Self {
        Self { to: to.into() }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        info!("would send email to {}: {}", self.to, event.summary());
        Ok(())
    }
}

/// Fallback when no webhook is configured: the alert goes to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        warn!("admin alert: {}", event.summary());
        Ok(())
    }
}

/// Fire-and-forget delivery used by the sweeper and the failure path: spawn
/// the send so one slow webhook cannot block the next sweep, log on error.
pub fn notify_detached(notifier: std::sync::Arc<dyn Notifier>, event: NotifyEvent) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&event).await {
            error!("failed to deliver admin notification: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_event_serializes_with_tag() {
        let event = NotifyEvent::TaskTimeout {
            task_id: TaskId::generate(),
            queue: QueueName::new("cpu"),
            waited_secs: 31.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_timeout");
        assert_eq!(json["queue"], "cpu");
        assert!((json["waited_secs"].as_f64().unwrap() - 31.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn email_notifier_is_a_stub_that_never_fails() {
        let event = NotifyEvent::TaskTimeout {
            task_id: TaskId::generate(),
            queue: QueueName::new("io"),
            waited_secs: 45.0,
        };
        EmailNotifier::new("ops@example.com")
            .notify(&event)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let event = NotifyEvent::TaskFailure {
            task_id: TaskId::generate(),
            error: "boom".into(),
        };
        LogNotifier.notify(&event).await.unwrap();
    }
}
