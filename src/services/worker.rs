use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::broker::{MessageBroker, PayloadStream},
    models::{
        message::Message,
        retry::RetryConfig,
        stat::{Stat, StatStatus},
    },
    utils::retry_with_backoff,
};

/// A delivery backend for one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, text: &str, destination: &str) -> Result<(), Error>;
}

/// Channel name to backend mapping. Entries can be swapped while workers run.
#[derive(Default)]
pub struct ChannelRegistry {
    senders: RwLock<HashMap<String, Arc<dyn ChannelSender>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the backend for `channel`, returning the previous one.
    pub fn register(
        &self,
        channel: impl Into<String>,
        sender: Arc<dyn ChannelSender>,
    ) -> Option<Arc<dyn ChannelSender>> {
        self.senders.write().insert(channel.into(), sender)
    }

    pub fn unregister(&self, channel: &str) -> Option<Arc<dyn ChannelSender>> {
        self.senders.write().remove(channel)
    }

    pub fn get(&self, channel: &str) -> Option<Arc<dyn ChannelSender>> {
        self.senders.read().get(channel).cloned()
    }

    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.senders.read().keys().cloned().collect();
        channels.sort();
        channels
    }
}

#[derive(Debug, Clone)]
pub struct WorkerQueues {
    pub consume: String,
    pub success: String,
    pub fail: String,
}

impl WorkerQueues {
    pub fn new(
        consume: impl Into<String>,
        success: impl Into<String>,
        fail: impl Into<String>,
    ) -> Self {
        Self {
            consume: consume.into(),
            success: success.into(),
            fail: fail.into(),
        }
    }
}

/// Consumes dispatched messages, hands each one to the backend registered
/// for its channel and reports the outcome on the statistics queue.
pub struct ChannelWorker {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<ChannelRegistry>,
    stat_tx: mpsc::Sender<Stat>,
    fail_queue: RwLock<Option<String>>,
    resubscribe: RetryConfig,
}

impl ChannelWorker {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        registry: Arc<ChannelRegistry>,
        stat_tx: mpsc::Sender<Stat>,
    ) -> Self {
        Self {
            broker,
            registry,
            stat_tx,
            fail_queue: RwLock::new(None),
            resubscribe: RetryConfig {
                max_attempts: 5,
                initial_delay_ms: 500,
                max_delay_ms: 10_000,
                backoff_multiplier: 2,
            },
        }
    }

    /// Backoff used to re-establish the consumer after its stream ends.
    pub fn with_resubscribe_backoff(mut self, config: RetryConfig) -> Self {
        self.resubscribe = config;
        self
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub async fn start(
        self: &Arc<Self>,
        queues: WorkerQueues,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, Error> {
        self.broker.connect().await.map_err(|e| {
            error!(error = %e, "Channel worker failed to connect to the broker");
            e
        })?;

        self.broker
            .declare_durable_queues(&[
                queues.consume.as_str(),
                queues.success.as_str(),
                queues.fail.as_str(),
            ])
            .await?;

        *self.fail_queue.write() = Some(queues.fail.clone());

        let mut deliveries = self.broker.consume(&queues.consume).await?;

        info!(
            queue = %queues.consume,
            channels = ?self.registry.channels(),
            "Channel worker started"
        );

        let worker = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Channel worker cancelled");
                        break;
                    }
                    delivery = deliveries.next() => {
                        match delivery {
                            Some(Ok(payload)) => {
                                worker.handle_payload(&payload).await;
                                continue;
                            }
                            Some(Err(e)) => {
                                error!(queue = %queues.consume, error = %e, "Consumer failed");
                            }
                            None => warn!(queue = %queues.consume, "Consumer stream ended"),
                        }

                        match worker.resubscribe(&queues.consume, &cancel).await {
                            Some(stream) => deliveries = stream,
                            None => break,
                        }
                    }
                }
            }
        }))
    }

    /// Reconnects if needed and consumes `queue` again. Keeps trying until it
    /// succeeds; returns `None` only when cancelled.
    async fn resubscribe(
        &self,
        queue: &str,
        cancel: &CancellationToken,
    ) -> Option<PayloadStream> {
        let broker = &self.broker;

        loop {
            let attempt = retry_with_backoff(&self.resubscribe, || async move {
                if !broker.is_connected() {
                    broker.reconnect().await?;
                }
                broker.consume(queue).await
            });

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return None,
                result = attempt => match result {
                    Ok(stream) => {
                        info!(queue, "Consumer re-established");
                        return Some(stream);
                    }
                    Err(e) => error!(
                        queue,
                        error = %e,
                        "Could not re-establish consumer, starting a new backoff round"
                    ),
                },
            }
        }
    }

    async fn handle_payload(&self, payload: &[u8]) {
        match serde_json::from_slice::<Message>(payload) {
            Ok(message) => self.send(&message).await,
            Err(e) => error!(error = %e, "Failed to decode message, skipping"),
        }
    }

    pub async fn send(&self, message: &Message) {
        let Some(sender) = self.registry.get(&message.channel) else {
            warn!(
                channel = %message.channel,
                notification_uuid = %message.notification_uuid,
                "No backend registered for channel"
            );
            self.record(message, StatStatus::BadChannel).await;
            self.requeue(message).await;
            return;
        };

        match sender.send(&message.text, &message.destination_address).await {
            Ok(()) => {
                debug!(
                    channel = %message.channel,
                    person_uuid = %message.person_uuid,
                    "Message delivered"
                );
                self.record(message, StatStatus::Sent).await;
            }
            Err(e) => {
                error!(
                    channel = %message.channel,
                    person_uuid = %message.person_uuid,
                    error = %e,
                    "Delivery failed"
                );
                self.record(message, StatStatus::Failed).await;
                self.requeue(message).await;
            }
        }
    }

    async fn record(&self, message: &Message, status: StatStatus) {
        let stat = Stat::for_message(message, status);

        if let Err(e) = self.stat_tx.send(stat).await {
            error!(
                notification_uuid = %message.notification_uuid,
                status = %status,
                error = %e,
                "Statistics queue closed, stat lost"
            );
        }
    }

    async fn requeue(&self, message: &Message) {
        let Some(fail_queue) = self.fail_queue.read().clone() else {
            warn!("Failed-work queue not configured, message not requeued");
            return;
        };

        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode message for requeue");
                return;
            }
        };

        if let Err(e) = self.broker.publish(&fail_queue, &payload).await {
            error!(queue = %fail_queue, error = %e, "Failed to requeue message");
        }
    }

    pub fn stop(&self) {
        info!("Channel worker stop requested");
    }
}
