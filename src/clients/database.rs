use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    models::stat::{Stat, StatStatus},
    services::stat::StatStorage,
};

const CREATE_STATS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS delivery_stats (
        stat_uuid UUID PRIMARY KEY,
        person_uuid UUID NOT NULL,
        notification_uuid UUID NOT NULL,
        created_at TEXT NOT NULL,
        status SMALLINT NOT NULL
    )
"#;

const SELECT_STATS: &str =
    "SELECT stat_uuid, person_uuid, notification_uuid, created_at, status FROM delivery_stats";

pub struct PostgresStatStorage {
    client: Client,
}

impl PostgresStatStorage {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        client
            .batch_execute(CREATE_STATS_TABLE)
            .await
            .map_err(|e| anyhow!("Failed to prepare stats table: {}", e))?;

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    fn stat_from_row(row: &Row) -> Result<Stat, Error> {
        let status: i16 = row.try_get("status")?;
        let status = u8::try_from(status)
            .map_err(|_| anyhow!("Stat status {} out of range", status))
            .and_then(|code| StatStatus::try_from(code).map_err(Error::from))?;

        Ok(Stat {
            stat_uuid: row.try_get("stat_uuid")?,
            person_uuid: row.try_get("person_uuid")?,
            notification_uuid: row.try_get("notification_uuid")?,
            created_at: row.try_get("created_at")?,
            status,
        })
    }

    async fn query_stats(&self, filter: Option<(&str, Uuid)>) -> Result<Vec<Stat>, Error> {
        let rows = match filter {
            Some((column, value)) => {
                let sql = format!("{} WHERE {} = $1 ORDER BY created_at", SELECT_STATS, column);
                self.client.query(sql.as_str(), &[&value]).await
            }
            None => {
                let sql = format!("{} ORDER BY created_at", SELECT_STATS);
                self.client.query(sql.as_str(), &[]).await
            }
        }
        .map_err(|e| anyhow!("Stats query failed: {}", e))?;

        rows.iter().map(Self::stat_from_row).collect()
    }
}

#[async_trait]
impl StatStorage for PostgresStatStorage {
    async fn store(&self, stat: Stat) -> Result<(), Error> {
        let status = i16::from(u8::from(stat.status));

        self.client
            .execute(
                "INSERT INTO delivery_stats (stat_uuid, person_uuid, notification_uuid, created_at, status) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &stat.stat_uuid,
                    &stat.person_uuid,
                    &stat.notification_uuid,
                    &stat.created_at,
                    &status,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    notification_uuid = %stat.notification_uuid,
                    "Failed to write stat to database"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(
            notification_uuid = %stat.notification_uuid,
            status = %stat.status,
            "Stat written to database"
        );

        Ok(())
    }

    async fn all(&self) -> Result<Vec<Stat>, Error> {
        self.query_stats(None).await
    }

    async fn by_person(&self, person_uuid: Uuid) -> Result<Vec<Stat>, Error> {
        self.query_stats(Some(("person_uuid", person_uuid))).await
    }

    async fn by_notification(&self, notification_uuid: Uuid) -> Result<Vec<Stat>, Error> {
        self.query_stats(Some(("notification_uuid", notification_uuid)))
            .await
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}
