use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key/value substitution applied to `[key]` placeholders of a template body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageParam {
    pub key: String,
    pub value: String,
}

impl MessageParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Notification request as received at the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingNotification {
    pub event_uuid: Uuid,
    pub person_uuids: Vec<Uuid>,

    #[serde(default)]
    pub message_params: Vec<MessageParam>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Admitted notification travelling from admission to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_uuid: Uuid,
    pub event_uuid: Uuid,
    pub person_uuids: Vec<Uuid>,

    #[serde(default)]
    pub message_params: Vec<MessageParam>,

    #[serde(default)]
    pub priority: u32,

    /// Position inside the admission heap. Only meaningful while queued.
    #[serde(skip)]
    pub index: Option<usize>,
}

impl Notification {
    pub fn new(event_uuid: Uuid, person_uuids: Vec<Uuid>, priority: u32) -> Self {
        Self {
            notification_uuid: Uuid::nil(),
            event_uuid,
            person_uuids,
            message_params: Vec::new(),
            priority,
            index: None,
        }
    }

    pub fn with_params(mut self, message_params: Vec<MessageParam>) -> Self {
        self.message_params = message_params;
        self
    }

    pub fn with_uuid(mut self, notification_uuid: Uuid) -> Self {
        self.notification_uuid = notification_uuid;
        self
    }

    pub fn from_incoming(incoming: IncomingNotification, default_priority: u32) -> Self {
        Self {
            notification_uuid: Uuid::nil(),
            event_uuid: incoming.event_uuid,
            person_uuids: incoming.person_uuids,
            message_params: incoming.message_params,
            priority: incoming.priority.unwrap_or(default_priority),
            index: None,
        }
    }

    pub fn has_uuid(&self) -> bool {
        !self.notification_uuid.is_nil()
    }
}
