use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub channel: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonContacts {
    pub person_uuid: Uuid,

    #[serde(default)]
    pub contacts: Vec<Contact>,
}

impl PersonContacts {
    pub fn for_channel(&self, channel: &str) -> Option<&Contact> {
        self.contacts.iter().find(|contact| contact.channel == channel)
    }
}
