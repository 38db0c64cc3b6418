use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single resolved delivery unit: one recipient on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub notification_uuid: Uuid,
    pub person_uuid: Uuid,
    pub text: String,
    pub channel: String,
    pub destination_address: String,
}
