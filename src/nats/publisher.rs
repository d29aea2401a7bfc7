// src/nats/publisher.rs
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::connection::Command;
use crate::error::PublishError;

/// Publish-only capability on a connection. It cannot connect or disconnect;
/// each call acts on whatever channel is `Open` at that moment and fails with
/// `NotConnected` otherwise. Nothing is queued.
#[derive(Clone)]
pub struct Publisher {
    commands: mpsc::Sender<Command>,
}

impl Publisher {
    pub(crate) fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    pub async fn publish(&self, subject: &str, payload: String) -> Result<(), PublishError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                subject: subject.to_string(),
                payload,
                reply,
            })
            .await
            .map_err(|_| PublishError::NotConnected)?;
        rx.await.map_err(|_| PublishError::NotConnected)?
    }

    /// Serialize `value` to JSON and publish it.
    pub async fn publish_json<T: Serialize>(
        &self,
        subject: &str,
        value: &T,
    ) -> Result<(), PublishError> {
        let payload =
            serde_json::to_string(value).map_err(|e| PublishError::Serialize(e.to_string()))?;
        self.publish(subject, payload).await
    }
}
