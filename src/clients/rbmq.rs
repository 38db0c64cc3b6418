use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    clients::broker::{MessageBroker, PayloadStream},
    config::Config,
    error::NotifyError,
};

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

pub struct RabbitMqClient {
    url: String,
    prefetch_count: u16,
    session: RwLock<Option<AmqpSession>>,
}

impl RabbitMqClient {
    pub fn new(url: impl Into<String>, prefetch_count: u16) -> Self {
        Self {
            url: url.into(),
            prefetch_count,
            session: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.rabbitmq_url.clone(), config.prefetch_count)
    }

    async fn open_session(&self) -> Result<AmqpSession, Error> {
        info!("Connecting to RabbitMQ...");

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| NotifyError::BrokerUnavailable(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        info!(prefetch_count = self.prefetch_count, "RabbitMQ channel ready");

        Ok(AmqpSession {
            connection,
            channel,
        })
    }

    fn channel(&self) -> Result<Channel, Error> {
        self.session
            .read()
            .as_ref()
            .map(|session| session.channel.clone())
            .ok_or_else(|| anyhow!("RabbitMQ client is not connected"))
    }

    async fn publish_once(&self, queue: &str, payload: &[u8]) -> Result<(), Error> {
        let channel = self.channel()?;

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message to {}: {}", queue, e))?;

        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RabbitMqClient {
    async fn connect(&self) -> Result<(), Error> {
        let session = self.open_session().await?;
        *self.session.write() = Some(session);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), Error> {
        warn!("Reconnecting to RabbitMQ");
        self.close().await;
        self.connect().await
    }

    async fn declare_durable_queues(&self, queues: &[&str]) -> Result<(), Error> {
        let channel = self.channel()?;

        for queue in queues.iter().filter(|q| !q.is_empty()) {
            let declared = channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await;

            match declared {
                Ok(_) => debug!(queue, "Durable queue declared"),
                Err(e) => error!(queue, error = %e, "Failed to declare queue"),
            }
        }

        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Error> {
        if !self.is_connected() {
            self.reconnect().await?;
        }

        match self.publish_once(queue, payload).await {
            Ok(()) => Ok(()),
            Err(e) if !self.is_connected() => {
                warn!(queue, error = %e, "Publish failed on a dead channel, retrying once");
                self.reconnect().await?;
                self.publish_once(queue, payload).await
            }
            Err(e) => Err(e),
        }
    }

    async fn consume(&self, queue: &str) -> Result<PayloadStream, Error> {
        let channel = self.channel()?;

        let consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer for {}: {}", queue, e))?;

        info!(queue, "Consumer created for queue");

        let payloads = consumer.map(|delivery| {
            delivery
                .map(|delivery| delivery.data)
                .map_err(|e| anyhow!("Failed to receive delivery: {}", e))
        });

        Ok(payloads.boxed())
    }

    async fn close(&self) {
        let session = self.session.write().take();

        let Some(session) = session else {
            return;
        };

        if let Err(e) = session.channel.close(200, "closing").await {
            warn!(error = %e, "Channel close error");
        }

        if let Err(e) = session.connection.close(200, "closing").await {
            warn!(error = %e, "Connection close error");
        }

        info!("RabbitMQ connection closed");
    }

    fn is_connected(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|session| {
                session.connection.status().connected() && session.channel.status().connected()
            })
            .unwrap_or(false)
    }
}
