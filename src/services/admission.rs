use anyhow::{Error, Result};
use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    error::NotifyError, models::notification::Notification,
    services::priority_queue::PriorityQueue,
};

/// Front door of the pipeline: orders incoming batches by priority and feeds
/// them one at a time into the delivery queue read by the dispatcher.
///
/// No rate limit is applied here.
pub struct AdmissionService {
    queue: Mutex<PriorityQueue>,
    delivery_tx: RwLock<Option<mpsc::Sender<Notification>>>,
}

impl AdmissionService {
    pub fn new(delivery_tx: mpsc::Sender<Notification>) -> Self {
        Self {
            queue: Mutex::new(PriorityQueue::new()),
            delivery_tx: RwLock::new(Some(delivery_tx)),
        }
    }

    pub fn start(&self) {
        info!("Notification admission started");
    }

    /// Queues the whole batch and returns once every item has been handed to
    /// the delivery queue. Returns the notification uuids in input order.
    pub async fn process_notification(
        &self,
        batch: Vec<Notification>,
    ) -> Result<Vec<Uuid>, Error> {
        let sender = self
            .delivery_tx
            .read()
            .clone()
            .ok_or(NotifyError::AdmissionClosed)?;

        let mut queue = self.queue.lock().await;
        let mut accepted = Vec::with_capacity(batch.len());

        for mut notification in batch {
            if !notification.has_uuid() {
                notification.notification_uuid = Uuid::new_v4();
            }
            accepted.push(notification.notification_uuid);
            queue.push(notification);
        }

        debug!(batch_size = accepted.len(), "Batch prioritized");

        while let Some(notification) = queue.pop() {
            let notification_uuid = notification.notification_uuid;
            let priority = notification.priority;

            if sender.send(notification).await.is_err() {
                let dropped = queue.len() + 1;
                while queue.pop().is_some() {}
                error!(dropped, "Delivery queue closed while draining batch");
                return Err(NotifyError::AdmissionClosed.into());
            }

            debug!(notification_uuid = %notification_uuid, priority, "Notification admitted");
        }

        Ok(accepted)
    }

    pub fn stop(&self) {
        self.delivery_tx.write().take();
        info!("Notification admission stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.delivery_tx.read().is_none()
    }
}
