use std::collections::HashMap;

use anyhow::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::NotifyError,
    models::{
        event::{Event, IncomingEvent},
        template::{IncomingTemplate, Template},
    },
    services::gateway::{EventLookup, TemplateLookup},
};

#[derive(Default)]
pub struct EventStore {
    events: RwLock<HashMap<Uuid, Event>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.read().values().cloned().collect();
        events.sort_by(|a, b| a.title.cmp(&b.title));
        events
    }

    pub fn store(&self, incoming: IncomingEvent) -> Event {
        let event = incoming.into_event(Uuid::new_v4());
        self.events.write().insert(event.event_uuid, event.clone());
        info!(event_uuid = %event.event_uuid, title = %event.title, "Event stored");
        event
    }

    pub fn update(&self, event: Event) -> Result<Event, Error> {
        let mut events = self.events.write();
        let slot = events
            .get_mut(&event.event_uuid)
            .ok_or_else(|| NotifyError::NotFound(format!("event {}", event.event_uuid)))?;
        *slot = event.clone();
        Ok(event)
    }

    pub fn get(&self, event_uuid: Uuid) -> Result<Event, Error> {
        self.events
            .read()
            .get(&event_uuid)
            .cloned()
            .ok_or_else(|| NotifyError::NotFound(format!("event {}", event_uuid)).into())
    }

    pub fn delete_by_id(&self, event_uuid: Uuid) -> Result<(), Error> {
        self.events
            .write()
            .remove(&event_uuid)
            .map(|_| ())
            .ok_or_else(|| NotifyError::NotFound(format!("event {}", event_uuid)).into())
    }

    /// Priority used when a notification arrives without one.
    pub fn default_priority(&self, event_uuid: Uuid) -> u32 {
        self.events
            .read()
            .get(&event_uuid)
            .map(|event| event.default_priority)
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventLookup for EventStore {
    async fn find_by_id(&self, event_uuid: Uuid) -> Result<Event, Error> {
        self.get(event_uuid)
    }
}

#[derive(Default)]
pub struct TemplateStore {
    templates: RwLock<HashMap<Uuid, Template>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Template> {
        let mut templates: Vec<Template> = self.templates.read().values().cloned().collect();
        templates.sort_by(|a, b| a.title.cmp(&b.title));
        templates
    }

    pub fn store(&self, incoming: IncomingTemplate) -> Template {
        let template = incoming.into_template(Uuid::new_v4());
        self.templates
            .write()
            .insert(template.template_uuid, template.clone());
        info!(
            template_uuid = %template.template_uuid,
            channel = %template.channel_type,
            "Template stored"
        );
        template
    }

    pub fn update(&self, template: Template) -> Result<Template, Error> {
        let mut templates = self.templates.write();
        let slot = templates
            .get_mut(&template.template_uuid)
            .ok_or_else(|| NotifyError::NotFound(format!("template {}", template.template_uuid)))?;
        *slot = template.clone();
        Ok(template)
    }

    pub fn get(&self, template_uuid: Uuid) -> Result<Template, Error> {
        self.templates
            .read()
            .get(&template_uuid)
            .cloned()
            .ok_or_else(|| NotifyError::NotFound(format!("template {}", template_uuid)).into())
    }

    pub fn delete_by_id(&self, template_uuid: Uuid) -> Result<(), Error> {
        self.templates
            .write()
            .remove(&template_uuid)
            .map(|_| ())
            .ok_or_else(|| NotifyError::NotFound(format!("template {}", template_uuid)).into())
    }

    pub fn by_event(&self, event_uuid: Uuid) -> Vec<Template> {
        self.templates
            .read()
            .values()
            .filter(|template| template.event_uuid == event_uuid)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TemplateLookup for TemplateStore {
    async fn find_by_event_id(&self, event_uuid: Uuid) -> Result<Vec<Template>, Error> {
        Ok(self.by_event(event_uuid))
    }
}
