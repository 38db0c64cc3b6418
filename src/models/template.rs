use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub template_uuid: Uuid,
    pub event_uuid: Uuid,
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub body: String,
    pub channel_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingTemplate {
    pub event_uuid: Uuid,
    pub title: String,

    #[serde(default)]
    pub description: String,

    pub body: String,
    pub channel_type: String,
}

impl IncomingTemplate {
    pub fn into_template(self, template_uuid: Uuid) -> Template {
        Template {
            template_uuid,
            event_uuid: self.event_uuid,
            title: self.title,
            description: self.description,
            body: self.body,
            channel_type: self.channel_type,
        }
    }
}
