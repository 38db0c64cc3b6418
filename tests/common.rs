use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use notify_service::{
    clients::{
        broker::{MemoryBroker, MessageBroker, PayloadStream},
        contact_vault::ContactVault,
    },
    error::NotifyError,
    models::{
        contact::{Contact, PersonContacts},
        event::{Event, IncomingEvent},
        template::{IncomingTemplate, Template},
    },
    services::{
        catalog::{EventStore, TemplateStore},
        gateway::{ResolutionGateway, ServiceFacade},
        worker::ChannelSender,
    },
};
use parking_lot::Mutex;
use uuid::Uuid;

/// Contact vault backed by a fixed map.
#[derive(Default)]
pub struct FakeVault {
    people: HashMap<Uuid, Vec<Contact>>,
}

impl FakeVault {
    pub fn with_person(mut self, person_uuid: Uuid, contacts: &[(&str, &str)]) -> Self {
        let contacts = contacts
            .iter()
            .map(|(channel, destination)| Contact {
                channel: channel.to_string(),
                destination: destination.to_string(),
            })
            .collect();
        self.people.insert(person_uuid, contacts);
        self
    }
}

#[async_trait]
impl ContactVault for FakeVault {
    async fn find_by_person_uuid(&self, person_uuid: Uuid) -> Result<PersonContacts, Error> {
        let contacts = self
            .people
            .get(&person_uuid)
            .cloned()
            .ok_or_else(|| NotifyError::NotFound(format!("person {}", person_uuid)))?;

        Ok(PersonContacts {
            person_uuid,
            contacts,
        })
    }
}

/// Records every (text, destination) pair it is asked to deliver.
#[derive(Default, Clone)]
pub struct RecordingSender {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(&self, text: &str, destination: &str) -> Result<(), Error> {
        self.sent
            .lock()
            .push((text.to_string(), destination.to_string()));
        Ok(())
    }
}

pub struct FailingSender;

#[async_trait]
impl ChannelSender for FailingSender {
    async fn send(&self, _text: &str, _destination: &str) -> Result<(), Error> {
        Err(anyhow!("gateway rejected the message"))
    }
}

/// Memory broker whose first `failures` publishes are rejected.
pub struct FlakyBroker {
    inner: MemoryBroker,
    failures: AtomicUsize,
}

impl FlakyBroker {
    pub fn new(inner: MemoryBroker, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl MessageBroker for FlakyBroker {
    async fn connect(&self) -> Result<(), Error> {
        self.inner.connect().await
    }

    async fn reconnect(&self) -> Result<(), Error> {
        self.inner.reconnect().await
    }

    async fn declare_durable_queues(&self, queues: &[&str]) -> Result<(), Error> {
        self.inner.declare_durable_queues(queues).await
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Error> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("publish rejected"));
        }
        self.inner.publish(queue, payload).await
    }

    async fn consume(&self, queue: &str) -> Result<PayloadStream, Error> {
        self.inner.consume(queue).await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

/// Memory broker whose first consumer stream ends immediately, as a
/// dropped AMQP channel would.
pub struct EndingBroker {
    inner: MemoryBroker,
    pub consumes: Arc<AtomicUsize>,
}

impl EndingBroker {
    pub fn new(inner: MemoryBroker) -> Self {
        Self {
            inner,
            consumes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl MessageBroker for EndingBroker {
    async fn connect(&self) -> Result<(), Error> {
        self.inner.connect().await
    }

    async fn reconnect(&self) -> Result<(), Error> {
        self.inner.reconnect().await
    }

    async fn declare_durable_queues(&self, queues: &[&str]) -> Result<(), Error> {
        self.inner.declare_durable_queues(queues).await
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Error> {
        self.inner.publish(queue, payload).await
    }

    async fn consume(&self, queue: &str) -> Result<PayloadStream, Error> {
        if self.consumes.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(futures_util::stream::empty().boxed());
        }
        self.inner.consume(queue).await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

/// Memory broker that reconnects on publish when closed, counting each
/// reconnect.
pub struct ReconnectingBroker {
    inner: MemoryBroker,
    pub reconnects: Arc<AtomicUsize>,
}

impl ReconnectingBroker {
    pub fn new(inner: MemoryBroker) -> Self {
        Self {
            inner,
            reconnects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl MessageBroker for ReconnectingBroker {
    async fn connect(&self) -> Result<(), Error> {
        self.inner.connect().await
    }

    async fn reconnect(&self) -> Result<(), Error> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.reconnect().await
    }

    async fn declare_durable_queues(&self, queues: &[&str]) -> Result<(), Error> {
        self.inner.declare_durable_queues(queues).await
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Error> {
        if !self.inner.is_connected() {
            self.reconnect().await?;
        }
        self.inner.publish(queue, payload).await
    }

    async fn consume(&self, queue: &str) -> Result<PayloadStream, Error> {
        self.inner.consume(queue).await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

/// Gateway whose event lookup takes `delay`, keeping a notification in
/// flight for a while.
pub struct SlowGateway {
    inner: Arc<ServiceFacade>,
    delay: Duration,
}

impl SlowGateway {
    pub fn new(inner: Arc<ServiceFacade>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl ResolutionGateway for SlowGateway {
    async fn get_contacts(&self, person_uuids: &[Uuid]) -> Vec<PersonContacts> {
        self.inner.get_contacts(person_uuids).await
    }

    async fn get_event(&self, event_uuid: Uuid) -> Result<Event, Error> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_event(event_uuid).await
    }

    async fn get_templates(&self, event_uuid: Uuid) -> Result<Vec<Template>, Error> {
        self.inner.get_templates(event_uuid).await
    }
}

pub struct Catalog {
    pub events: Arc<EventStore>,
    pub templates: Arc<TemplateStore>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(EventStore::new()),
            templates: Arc::new(TemplateStore::new()),
        }
    }

    pub fn event(&self, channels: &[&str], default_priority: u32) -> Event {
        self.events.store(IncomingEvent {
            title: "appointment reminder".to_string(),
            description: String::new(),
            default_priority,
            notification_channels: channels.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn template(&self, event_uuid: Uuid, channel: &str, body: &str) {
        self.templates.store(IncomingTemplate {
            event_uuid,
            title: format!("{} reminder", channel),
            description: String::new(),
            body: body.to_string(),
            channel_type: channel.to_string(),
        });
    }

    pub fn facade(&self, vault: FakeVault) -> Arc<ServiceFacade> {
        Arc::new(ServiceFacade::new(
            Arc::new(vault),
            self.events.clone(),
            self.templates.clone(),
            Duration::from_secs(1),
        ))
    }
}

pub async fn next_payload<T: serde::de::DeserializeOwned>(stream: &mut PayloadStream) -> Result<T> {
    let payload = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .map_err(|_| anyhow!("timed out waiting for payload"))?
        .ok_or_else(|| anyhow!("stream ended"))??;

    Ok(serde_json::from_slice(&payload)?)
}
