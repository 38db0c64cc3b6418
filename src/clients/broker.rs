use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::debug;

pub type PayloadStream = BoxStream<'static, Result<Vec<u8>, Error>>;

/// Durable-queue broker as seen by the dispatcher and the channel workers.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn connect(&self) -> Result<(), Error>;

    async fn reconnect(&self) -> Result<(), Error>;

    /// Declares every non-empty queue name as durable.
    async fn declare_durable_queues(&self, queues: &[&str]) -> Result<(), Error>;

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Error>;

    async fn consume(&self, queue: &str) -> Result<PayloadStream, Error>;

    async fn close(&self);

    fn is_connected(&self) -> bool;
}

struct MemoryQueue {
    sender: UnboundedSender<Vec<u8>>,
    receiver: Option<UnboundedReceiver<Vec<u8>>>,
}

impl MemoryQueue {
    fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

/// In-process broker. Each queue supports a single consumer.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, MemoryQueue>>>,
    connected: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, queue: &str) -> UnboundedSender<Vec<u8>> {
        let mut queues = self.queues.lock();
        queues
            .entry(queue.to_string())
            .or_insert_with(MemoryQueue::new)
            .sender
            .clone()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn connect(&self) -> Result<(), Error> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), Error> {
        self.connect().await
    }

    async fn declare_durable_queues(&self, queues: &[&str]) -> Result<(), Error> {
        let mut declared = self.queues.lock();
        for queue in queues.iter().filter(|q| !q.is_empty()) {
            declared
                .entry(queue.to_string())
                .or_insert_with(MemoryQueue::new);
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(anyhow!("Broker is not connected"));
        }

        self.sender(queue)
            .send(payload.to_vec())
            .map_err(|_| anyhow!("Queue {} is closed", queue))?;

        debug!(queue, bytes = payload.len(), "Payload published to memory queue");
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<PayloadStream, Error> {
        let receiver = {
            let mut queues = self.queues.lock();
            queues
                .entry(queue.to_string())
                .or_insert_with(MemoryQueue::new)
                .receiver
                .take()
                .ok_or_else(|| anyhow!("Queue {} already has a consumer", queue))?
        };

        let stream = stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|payload| (Ok::<_, Error>(payload), receiver))
        });

        Ok(stream.boxed())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_requires_connection() {
        let broker = MemoryBroker::new();

        assert!(broker.publish("dispatch", b"{}").await.is_err());

        broker.connect().await.unwrap();
        assert!(broker.publish("dispatch", b"{}").await.is_ok());
    }

    #[tokio::test]
    async fn consume_yields_payloads_in_publish_order() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();
        broker.declare_durable_queues(&["dispatch", ""]).await.unwrap();

        broker.publish("dispatch", b"first").await.unwrap();
        broker.publish("dispatch", b"second").await.unwrap();

        let mut payloads = broker.consume("dispatch").await.unwrap();

        assert_eq!(payloads.next().await.unwrap().unwrap(), b"first".to_vec());
        assert_eq!(payloads.next().await.unwrap().unwrap(), b"second".to_vec());
    }

    #[tokio::test]
    async fn clones_share_connection_state() {
        let broker = MemoryBroker::new();
        let handle = broker.clone();

        handle.connect().await.unwrap();
        assert!(broker.is_connected());

        broker.close().await;
        assert!(!handle.is_connected());
        assert!(handle.publish("dispatch", b"{}").await.is_err());
    }

    #[tokio::test]
    async fn second_consumer_is_rejected() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();

        let _first = broker.consume("failed").await.unwrap();

        assert!(broker.consume("failed").await.is_err());
    }
}
