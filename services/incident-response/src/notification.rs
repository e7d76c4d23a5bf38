//! Notification dispatch capability.
//!
//! `LoggingNotifier` stands in for a real delivery channel: it logs every
//! message and keeps an outbox that can be inspected.

use async_trait::async_trait;
use rootstock_id::ScitizenId;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::info;

use crate::actors::{self, Actor, ActorContext, ActorError, ActorHandle};

/// One message to one scitizen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub scitizen_id: ScitizenId,
    pub subject: String,
    pub body: String,
}

/// Errors from notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Delivery to one recipient failed; the batch is aborted.
    #[error("send notification to {recipient}: {reason}")]
    Delivery {
        recipient: ScitizenId,
        reason: String,
    },

    /// The notifier worker is not accepting requests.
    #[error("notifier unavailable: {0}")]
    Actor(#[from] ActorError),
}

/// Delivers one message per recipient.
///
/// All-or-nothing at the call level: an error means the batch failed, with
/// no report of which recipients were reached.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, recipients: &[Recipient]) -> Result<(), NotifyError>;
}

/// Messages handled by `NotifierActor`.
#[derive(Debug)]
pub enum NotifierMessage {
    Notify {
        recipients: Vec<Recipient>,
        reply_to: oneshot::Sender<Result<(), NotifyError>>,
    },
    Outbox {
        reply_to: oneshot::Sender<Vec<Recipient>>,
    },
}

struct NotifierActor {
    outbox: Vec<Recipient>,
}

#[async_trait]
impl Actor for NotifierActor {
    type Message = NotifierMessage;

    fn name(&self) -> &str {
        "notifier"
    }

    async fn handle(
        &mut self,
        msg: NotifierMessage,
        _ctx: &mut ActorContext,
    ) -> Result<(), ActorError> {
        match msg {
            NotifierMessage::Notify {
                recipients,
                reply_to,
            } => {
                for recipient in recipients {
                    info!(
                        recipient = %recipient.scitizen_id,
                        subject = %recipient.subject,
                        "Notification sent"
                    );
                    self.outbox.push(recipient);
                }
                let _ = reply_to.send(Ok(()));
            }
            NotifierMessage::Outbox { reply_to } => {
                let _ = reply_to.send(self.outbox.clone());
            }
        }
        Ok(())
    }
}

/// Notification sink that logs instead of delivering.
#[derive(Debug, Clone)]
pub struct LoggingNotifier {
    handle: ActorHandle<NotifierMessage>,
}

impl LoggingNotifier {
    /// Spawn the notifier. Must be called inside a tokio runtime.
    pub fn spawn(mailbox_size: usize) -> Self {
        let actor = NotifierActor { outbox: Vec::new() };
        Self {
            handle: actors::spawn(actor, mailbox_size),
        }
    }

    /// Everything "sent" so far, in order.
    pub async fn outbox(&self) -> Result<Vec<Recipient>, NotifyError> {
        Ok(self
            .handle
            .call(|reply_to| NotifierMessage::Outbox { reply_to })
            .await?)
    }

    /// Stop the worker after all pending requests.
    pub async fn shutdown(&self) {
        self.handle.shutdown().await;
    }
}

#[async_trait]
impl NotificationDispatcher for LoggingNotifier {
    async fn notify(&self, recipients: &[Recipient]) -> Result<(), NotifyError> {
        let recipients = recipients.to_vec();
        self.handle
            .call(|reply_to| NotifierMessage::Notify {
                recipients,
                reply_to,
            })
            .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(subject: &str) -> Recipient {
        Recipient {
            scitizen_id: ScitizenId::new(),
            subject: subject.to_string(),
            body: "body".to_string(),
        }
    }

    #[tokio::test]
    async fn test_notify_records_each_recipient_in_order() {
        let notifier = LoggingNotifier::spawn(8);
        let batch = vec![recipient("a"), recipient("b")];

        notifier.notify(&batch).await.unwrap();
        notifier.notify(&[recipient("c")]).await.unwrap();

        let subjects: Vec<_> = notifier
            .outbox()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.subject)
            .collect();
        assert_eq!(subjects, vec!["a", "b", "c"]);

        notifier.shutdown().await;
    }

    #[tokio::test]
    async fn test_notify_after_shutdown_fails() {
        let notifier = LoggingNotifier::spawn(8);
        notifier.shutdown().await;

        let err = notifier.notify(&[recipient("late")]).await.unwrap_err();
        assert!(matches!(err, NotifyError::Actor(ActorError::Stopped)));
    }
}
