use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_uuid: Uuid,
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub default_priority: u32,

    #[serde(default)]
    pub notification_channels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingEvent {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub default_priority: u32,

    #[serde(default)]
    pub notification_channels: Vec<String>,
}

impl IncomingEvent {
    pub fn into_event(self, event_uuid: Uuid) -> Event {
        Event {
            event_uuid,
            title: self.title,
            description: self.description,
            default_priority: self.default_priority,
            notification_channels: self.notification_channels,
        }
    }
}
