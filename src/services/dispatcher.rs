use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    clients::broker::MessageBroker,
    models::{message::Message, notification::Notification},
    services::gateway::{ResolutionGateway, resolve_messages},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Listening,
    Stopped,
}

/// Turns admitted notifications into per-recipient messages and publishes
/// them to the outbound dispatch queue.
pub struct Dispatcher {
    gateway: Arc<dyn ResolutionGateway>,
    broker: Arc<dyn MessageBroker>,
    queue_name: String,
    input: Mutex<Option<mpsc::Receiver<Notification>>>,
    state: Mutex<DispatcherState>,
    listener: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        input: mpsc::Receiver<Notification>,
        gateway: Arc<dyn ResolutionGateway>,
        broker: Arc<dyn MessageBroker>,
        queue_name: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            broker,
            queue_name: queue_name.into(),
            input: Mutex::new(Some(input)),
            state: Mutex::new(DispatcherState::Idle),
            listener: Mutex::new(None),
            cancel,
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.lock()
    }

    /// Connects the broker, declares the dispatch queue and spawns the
    /// listener. A broker connection failure prevents the start.
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        if self.state() != DispatcherState::Idle {
            return Err(anyhow!("Dispatcher can only be started once"));
        }

        self.broker.connect().await.map_err(|e| {
            error!(error = %e, "Dispatcher failed to connect to the broker");
            e
        })?;

        if let Err(e) = self
            .broker
            .declare_durable_queues(&[self.queue_name.as_str()])
            .await
        {
            error!(queue = %self.queue_name, error = %e, "Failed to declare dispatch queue");
        }

        let input = self
            .input
            .lock()
            .take()
            .ok_or_else(|| anyhow!("Dispatcher input queue already taken"))?;

        *self.state.lock() = DispatcherState::Listening;
        info!(queue = %self.queue_name, "Notification dispatcher started");

        let dispatcher = Arc::clone(self);
        *self.listener.lock() = Some(tokio::spawn(async move { dispatcher.listen(input).await }));

        Ok(())
    }

    async fn listen(&self, mut input: mpsc::Receiver<Notification>) {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Dispatcher listener cancelled");
                    break;
                }
                received = input.recv() => match received {
                    Some(notification) => {
                        self.handle_notification(notification).await;
                    }
                    None => {
                        info!("Delivery queue closed, dispatcher listener exiting");
                        break;
                    }
                },
            }
        }
    }

    /// Returns the number of messages successfully published.
    pub async fn handle_notification(&self, mut notification: Notification) -> usize {
        if !notification.has_uuid() {
            notification.notification_uuid = Uuid::new_v4();
        }

        debug!(
            notification_uuid = %notification.notification_uuid,
            event_uuid = %notification.event_uuid,
            recipients = notification.person_uuids.len(),
            "Notification received"
        );

        let messages = resolve_messages(self.gateway.as_ref(), &notification).await;
        let total = messages.len();
        let mut published = 0;

        for message in &messages {
            match self.dispatch(message).await {
                Ok(()) => published += 1,
                Err(e) => error!(
                    notification_uuid = %message.notification_uuid,
                    person_uuid = %message.person_uuid,
                    channel = %message.channel,
                    error = %e,
                    "Message dispatch error"
                ),
            }
        }

        info!(
            notification_uuid = %notification.notification_uuid,
            total,
            published,
            "Notification dispatched"
        );

        published
    }

    pub async fn dispatch(&self, message: &Message) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;

        self.broker.publish(&self.queue_name, &payload).await?;

        debug!(
            person_uuid = %message.person_uuid,
            channel = %message.channel,
            "Message dispatched"
        );

        Ok(())
    }

    /// Cancels the listener and waits for the notification in flight to
    /// finish publishing before the broker is closed.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                error!(error = %e, "Dispatcher listener ended abnormally");
            }
        }

        self.broker.close().await;
        *self.state.lock() = DispatcherState::Stopped;
        info!("Notification dispatcher stopped");
    }
}
