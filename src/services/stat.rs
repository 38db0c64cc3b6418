use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{error::NotifyError, models::stat::Stat};

#[async_trait]
pub trait StatStorage: Send + Sync {
    async fn store(&self, stat: Stat) -> Result<(), Error>;

    async fn all(&self) -> Result<Vec<Stat>, Error>;

    async fn by_person(&self, person_uuid: Uuid) -> Result<Vec<Stat>, Error>;

    async fn by_notification(&self, notification_uuid: Uuid) -> Result<Vec<Stat>, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

#[derive(Default)]
pub struct MemoryStatStorage {
    stats: RwLock<Vec<Stat>>,
}

impl MemoryStatStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, predicate: impl Fn(&Stat) -> bool) -> Vec<Stat> {
        self.stats
            .read()
            .iter()
            .filter(|stat| predicate(stat))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StatStorage for MemoryStatStorage {
    async fn store(&self, stat: Stat) -> Result<(), Error> {
        self.stats.write().push(stat);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Stat>, Error> {
        Ok(self.stats.read().clone())
    }

    async fn by_person(&self, person_uuid: Uuid) -> Result<Vec<Stat>, Error> {
        Ok(self.filtered(|stat| stat.person_uuid == person_uuid))
    }

    async fn by_notification(&self, notification_uuid: Uuid) -> Result<Vec<Stat>, Error> {
        Ok(self.filtered(|stat| stat.notification_uuid == notification_uuid))
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Collects delivery outcomes from the statistics queue and answers queries
/// over them.
pub struct StatService {
    storage: Arc<dyn StatStorage>,
}

impl StatService {
    pub fn new(storage: Arc<dyn StatStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> Arc<dyn StatStorage> {
        Arc::clone(&self.storage)
    }

    pub fn start(
        self: &Arc<Self>,
        mut stats: mpsc::Receiver<Stat>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        info!("Stat collector started");

        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Stat collector cancelled");
                        break;
                    }
                    received = stats.recv() => match received {
                        Some(stat) => service.record(stat).await,
                        None => {
                            info!("Statistics queue closed, stat collector exiting");
                            break;
                        }
                    },
                }
            }
        })
    }

    pub async fn record(&self, stat: Stat) {
        let stat_uuid = stat.stat_uuid;
        let status = stat.status;

        match self.storage.store(stat).await {
            Ok(()) => debug!(stat_uuid = %stat_uuid, status = %status, "Stat stored"),
            Err(e) => error!(stat_uuid = %stat_uuid, error = %e, "Failed to store stat"),
        }
    }

    pub async fn all(&self) -> Result<Vec<Stat>, Error> {
        self.storage.all().await
    }

    pub async fn find_by_person_uuid(&self, person_uuid: Uuid) -> Result<Vec<Stat>, Error> {
        let stats = self.storage.by_person(person_uuid).await?;
        if stats.is_empty() {
            return Err(NotifyError::NotFound(format!("stats for person {}", person_uuid)).into());
        }
        Ok(stats)
    }

    pub async fn find_by_notification_uuid(
        &self,
        notification_uuid: Uuid,
    ) -> Result<Vec<Stat>, Error> {
        let stats = self.storage.by_notification(notification_uuid).await?;
        if stats.is_empty() {
            return Err(NotifyError::NotFound(format!(
                "stats for notification {}",
                notification_uuid
            ))
            .into());
        }
        Ok(stats)
    }
}
