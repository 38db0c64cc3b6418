use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::future::join_all;
use regex::Regex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::contact_vault::ContactVault,
    models::{
        contact::PersonContacts,
        event::Event,
        message::Message,
        notification::{MessageParam, Notification},
        template::Template,
    },
};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([a-zA-Z]+[0-9]*)\]").expect("placeholder pattern is valid")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Replaces every `[name]` placeholder with the matching parameter value, or
/// with nothing when no parameter has that key, then collapses whitespace runs
/// into a single space.
pub fn substitute_placeholders(template: &str, params: &[MessageParam]) -> String {
    let values: HashMap<&str, &str> = params
        .iter()
        .map(|param| (param.key.as_str(), param.value.as_str()))
        .collect();

    let replaced = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        values.get(&caps[1]).copied().unwrap_or_default().to_string()
    });

    WHITESPACE.replace_all(&replaced, " ").into_owned()
}

#[async_trait]
pub trait EventLookup: Send + Sync {
    async fn find_by_id(&self, event_uuid: Uuid) -> Result<Event, Error>;
}

#[async_trait]
pub trait TemplateLookup: Send + Sync {
    async fn find_by_event_id(&self, event_uuid: Uuid) -> Result<Vec<Template>, Error>;
}

/// Narrow view of the collaborator services the dispatcher depends on.
#[async_trait]
pub trait ResolutionGateway: Send + Sync {
    /// Best effort: recipients whose lookup fails are left out.
    async fn get_contacts(&self, person_uuids: &[Uuid]) -> Vec<PersonContacts>;

    async fn get_event(&self, event_uuid: Uuid) -> Result<Event, Error>;

    async fn get_templates(&self, event_uuid: Uuid) -> Result<Vec<Template>, Error>;

    fn prepare_template(&self, template: &str, params: &[MessageParam]) -> String {
        substitute_placeholders(template, params)
    }
}

pub struct ServiceFacade {
    contacts: Arc<dyn ContactVault>,
    events: Arc<dyn EventLookup>,
    templates: Arc<dyn TemplateLookup>,
    lookup_timeout: Duration,
}

impl ServiceFacade {
    pub fn new(
        contacts: Arc<dyn ContactVault>,
        events: Arc<dyn EventLookup>,
        templates: Arc<dyn TemplateLookup>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            contacts,
            events,
            templates,
            lookup_timeout,
        }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        lookup: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        timeout(self.lookup_timeout, lookup)
            .await
            .map_err(|_| anyhow!("{} lookup timed out after {:?}", what, self.lookup_timeout))?
    }
}

#[async_trait]
impl ResolutionGateway for ServiceFacade {
    async fn get_contacts(&self, person_uuids: &[Uuid]) -> Vec<PersonContacts> {
        let lookups = person_uuids.iter().map(|&person_uuid| async move {
            let result = self
                .bounded("contact", self.contacts.find_by_person_uuid(person_uuid))
                .await;
            (person_uuid, result)
        });

        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(person_uuid, result)| match result {
                Ok(contacts) => Some(contacts),
                Err(e) => {
                    warn!(person_uuid = %person_uuid, error = %e, "Contact lookup failed, skipping recipient");
                    None
                }
            })
            .collect()
    }

    async fn get_event(&self, event_uuid: Uuid) -> Result<Event, Error> {
        self.bounded("event", self.events.find_by_id(event_uuid))
            .await
    }

    async fn get_templates(&self, event_uuid: Uuid) -> Result<Vec<Template>, Error> {
        self.bounded("template", self.templates.find_by_event_id(event_uuid))
            .await
    }
}

/// Expands a notification into one message per (channel, recipient) pair that
/// has both a rendered template and a contact on that channel.
///
/// Channels follow the event's order; recipients follow the notification's.
pub async fn resolve_messages(
    gateway: &dyn ResolutionGateway,
    notification: &Notification,
) -> Vec<Message> {
    let contacts = gateway.get_contacts(&notification.person_uuids).await;

    let event = match gateway.get_event(notification.event_uuid).await {
        Ok(event) => event,
        Err(e) => {
            error!(
                notification_uuid = %notification.notification_uuid,
                event_uuid = %notification.event_uuid,
                error = %e,
                "Event lookup failed, nothing to dispatch"
            );
            return Vec::new();
        }
    };

    let templates = gateway
        .get_templates(notification.event_uuid)
        .await
        .unwrap_or_else(|e| {
            error!(event_uuid = %notification.event_uuid, error = %e, "Template lookup failed");
            Vec::new()
        });

    let prepared: HashMap<String, String> = templates
        .into_iter()
        .map(|template| {
            let text = gateway.prepare_template(&template.body, &notification.message_params);
            (template.channel_type, text)
        })
        .collect();

    let mut messages = Vec::new();

    for channel in &event.notification_channels {
        let Some(text) = prepared.get(channel) else {
            info!(
                channel = %channel,
                event_uuid = %event.event_uuid,
                "Template does not exist for channel, skipping"
            );
            continue;
        };

        for person in &contacts {
            let Some(contact) = person.for_channel(channel) else {
                info!(
                    channel = %channel,
                    person_uuid = %person.person_uuid,
                    "Recipient has no contact for channel, skipping"
                );
                continue;
            };

            debug!(channel = %channel, person_uuid = %person.person_uuid, "Message prepared");

            messages.push(Message {
                notification_uuid: notification.notification_uuid,
                person_uuid: person.person_uuid,
                text: text.clone(),
                channel: channel.clone(),
                destination_address: contact.destination.clone(),
            });
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_named_placeholders() {
        let params = vec![
            MessageParam::new("param1", "VAL1"),
            MessageParam::new("param2", "VAL2"),
        ];

        assert_eq!(
            substitute_placeholders("message [param1] and [param2] data", &params),
            "message VAL1 and VAL2 data"
        );
    }

    #[test]
    fn unknown_placeholders_are_removed_and_spaces_collapsed() {
        assert_eq!(
            substitute_placeholders("message [param1] and [param2] data", &[]),
            "message and data"
        );
    }

    #[test]
    fn newlines_collapse_to_single_space() {
        let params = vec![MessageParam::new("date", "21.03.2023")];

        assert_eq!(
            substitute_placeholders("Visit on\n\n[date]\tconfirmed", &params),
            "Visit on 21.03.2023 confirmed"
        );
    }

    #[test]
    fn only_letter_digit_placeholders_match() {
        let params = vec![
            MessageParam::new("1abc", "X"),
            MessageParam::new("a1b", "Y"),
            MessageParam::new("code", "Z"),
        ];

        assert_eq!(
            substitute_placeholders("[1abc] [a1b] [code]", &params),
            "[1abc] [a1b] Z"
        );
    }

    #[test]
    fn placeholder_values_are_not_rescanned() {
        let params = vec![
            MessageParam::new("a", "[b]"),
            MessageParam::new("b", "nested"),
        ];

        assert_eq!(substitute_placeholders("x [a] y", &params), "x [b] y");
    }
}
