use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::NotifyError, models::message::Message};

/// Delivery outcome. Encoded on the wire as 1, 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatStatus {
    Sent,
    Failed,
    BadChannel,
}

impl From<StatStatus> for u8 {
    fn from(status: StatStatus) -> Self {
        match status {
            StatStatus::Sent => 1,
            StatStatus::Failed => 2,
            StatStatus::BadChannel => 3,
        }
    }
}

impl TryFrom<u8> for StatStatus {
    type Error = NotifyError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(StatStatus::Sent),
            2 => Ok(StatStatus::Failed),
            3 => Ok(StatStatus::BadChannel),
            other => Err(NotifyError::InvalidInput(format!(
                "unknown stat status code {}",
                other
            ))),
        }
    }
}

impl Display for StatStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StatStatus::Sent => write!(f, "sent"),
            StatStatus::Failed => write!(f, "failed"),
            StatStatus::BadChannel => write!(f, "bad_channel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub stat_uuid: Uuid,
    pub person_uuid: Uuid,
    pub notification_uuid: Uuid,
    pub created_at: String,
    pub status: StatStatus,
}

impl Stat {
    pub fn for_message(message: &Message, status: StatStatus) -> Self {
        Self {
            stat_uuid: Uuid::new_v4(),
            person_uuid: message.person_uuid,
            notification_uuid: message.notification_uuid,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            status,
        }
    }
}
