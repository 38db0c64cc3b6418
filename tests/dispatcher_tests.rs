use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use anyhow::Result;
use notify_service::{
    clients::broker::{MemoryBroker, MessageBroker},
    models::{
        message::Message,
        notification::{MessageParam, Notification},
        stat::{Stat, StatStatus},
    },
    services::{
        admission::AdmissionService,
        dispatcher::{Dispatcher, DispatcherState},
        worker::{ChannelRegistry, ChannelWorker, WorkerQueues},
    },
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::common::{
    Catalog, FakeVault, FlakyBroker, ReconnectingBroker, RecordingSender, SlowGateway, next_payload,
};

/// Test: One channel, one template, one reachable recipient yields one message
#[tokio::test]
async fn test_fan_out_produces_single_message() -> Result<()> {
    let catalog = Catalog::new();
    let event = catalog.event(&["sms"], 0);
    catalog.template(event.event_uuid, "sms", "Hello [name], see you at [time]");

    let person = Uuid::new_v4();
    let vault = FakeVault::default().with_person(person, &[("sms", "+15550001")]);

    let broker = MemoryBroker::new();
    broker.connect().await?;
    let (_tx, rx) = mpsc::channel(1);
    let dispatcher = Dispatcher::new(
        rx,
        catalog.facade(vault),
        Arc::new(broker.clone()),
        "dispatch",
        CancellationToken::new(),
    );

    let notification = Notification::new(event.event_uuid, vec![person], 5)
        .with_params(vec![MessageParam::new("name", "Ada")]);

    assert_eq!(dispatcher.handle_notification(notification).await, 1);

    let mut stream = broker.consume("dispatch").await?;
    let message: Message = next_payload(&mut stream).await?;

    assert_eq!(message.person_uuid, person);
    assert_eq!(message.channel, "sms");
    assert_eq!(message.destination_address, "+15550001");
    assert_eq!(message.text, "Hello Ada, see you at ");
    assert!(!message.notification_uuid.is_nil());

    Ok(())
}

/// Test: Recipients without a contact on a channel are skipped silently
#[tokio::test]
async fn test_missing_channel_contact_is_skipped() -> Result<()> {
    let catalog = Catalog::new();
    let event = catalog.event(&["sms", "mail"], 0);
    catalog.template(event.event_uuid, "sms", "sms body");
    catalog.template(event.event_uuid, "mail", "mail body");

    let sms_only = Uuid::new_v4();
    let both = Uuid::new_v4();
    let unknown = Uuid::new_v4();
    let vault = FakeVault::default()
        .with_person(sms_only, &[("sms", "+15550002")])
        .with_person(both, &[("sms", "+15550003"), ("mail", "both@example.com")]);

    let broker = MemoryBroker::new();
    broker.connect().await?;
    let (_tx, rx) = mpsc::channel(1);
    let dispatcher = Dispatcher::new(
        rx,
        catalog.facade(vault),
        Arc::new(broker.clone()),
        "dispatch",
        CancellationToken::new(),
    );

    let notification = Notification::new(event.event_uuid, vec![sms_only, unknown, both], 0);

    assert_eq!(dispatcher.handle_notification(notification).await, 3);

    let mut stream = broker.consume("dispatch").await?;
    let mut received = Vec::new();
    for _ in 0..3 {
        let message: Message = next_payload(&mut stream).await?;
        received.push((message.channel, message.person_uuid));
    }

    assert_eq!(
        received,
        vec![
            ("sms".to_string(), sms_only),
            ("sms".to_string(), both),
            ("mail".to_string(), both),
        ]
    );

    Ok(())
}

/// Test: A channel with no template is skipped, an unknown event yields nothing
#[tokio::test]
async fn test_channels_without_template_and_unknown_events() -> Result<()> {
    let catalog = Catalog::new();
    let event = catalog.event(&["push", "sms"], 0);
    catalog.template(event.event_uuid, "sms", "body");

    let person = Uuid::new_v4();
    let vault = FakeVault::default().with_person(person, &[("push", "token"), ("sms", "+1555")]);

    let broker = MemoryBroker::new();
    broker.connect().await?;
    let (_tx, rx) = mpsc::channel(1);
    let dispatcher = Dispatcher::new(
        rx,
        catalog.facade(vault),
        Arc::new(broker),
        "dispatch",
        CancellationToken::new(),
    );

    let known = Notification::new(event.event_uuid, vec![person], 0);
    let unknown = Notification::new(Uuid::new_v4(), vec![person], 0);

    assert_eq!(dispatcher.handle_notification(known).await, 1);
    assert_eq!(dispatcher.handle_notification(unknown).await, 0);

    Ok(())
}

/// Test: A failed publish does not stop the remaining messages
#[tokio::test]
async fn test_publish_failure_does_not_abort_batch() -> Result<()> {
    let catalog = Catalog::new();
    let event = catalog.event(&["sms"], 0);
    catalog.template(event.event_uuid, "sms", "body");

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let vault = FakeVault::default()
        .with_person(first, &[("sms", "+1")])
        .with_person(second, &[("sms", "+2")]);

    let memory = MemoryBroker::new();
    memory.connect().await?;
    let (_tx, rx) = mpsc::channel(1);
    let dispatcher = Dispatcher::new(
        rx,
        catalog.facade(vault),
        Arc::new(FlakyBroker::new(memory.clone(), 1)),
        "dispatch",
        CancellationToken::new(),
    );

    let notification = Notification::new(event.event_uuid, vec![first, second], 0);

    assert_eq!(dispatcher.handle_notification(notification).await, 1);

    let mut stream = memory.consume("dispatch").await?;
    let message: Message = next_payload(&mut stream).await?;
    assert_eq!(message.person_uuid, second);

    Ok(())
}

/// Test: Dispatcher moves from idle to listening to stopped
#[tokio::test]
async fn test_dispatcher_state_machine() -> Result<()> {
    let catalog = Catalog::new();
    let broker = MemoryBroker::new();
    let (_tx, rx) = mpsc::channel(1);
    let dispatcher = Arc::new(Dispatcher::new(
        rx,
        catalog.facade(FakeVault::default()),
        Arc::new(broker.clone()),
        "dispatch",
        CancellationToken::new(),
    ));

    assert_eq!(dispatcher.state(), DispatcherState::Idle);

    dispatcher.start().await?;
    assert_eq!(dispatcher.state(), DispatcherState::Listening);
    assert!(broker.is_connected());
    assert!(dispatcher.start().await.is_err());

    tokio::time::timeout(Duration::from_secs(2), dispatcher.stop()).await?;

    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert!(!broker.is_connected());

    Ok(())
}

/// Test: Admission, dispatcher, worker and stats cooperate end to end
#[tokio::test]
async fn test_pipeline_delivers_to_registered_backend() -> Result<()> {
    let catalog = Catalog::new();
    let event = catalog.event(&["sms"], 0);
    catalog.template(event.event_uuid, "sms", "Code [code]");

    let person = Uuid::new_v4();
    let vault = FakeVault::default().with_person(person, &[("sms", "+15550009")]);

    let broker = MemoryBroker::new();
    let cancel = CancellationToken::new();

    let (delivery_tx, delivery_rx) = mpsc::channel(8);
    let (stat_tx, mut stat_rx) = mpsc::channel::<Stat>(8);

    let admission = AdmissionService::new(delivery_tx);
    let dispatcher = Arc::new(Dispatcher::new(
        delivery_rx,
        catalog.facade(vault),
        Arc::new(broker.clone()),
        "dispatch",
        cancel.child_token(),
    ));
    dispatcher.start().await?;

    let sender = RecordingSender::default();
    let registry = Arc::new(ChannelRegistry::new());
    registry.register("sms", Arc::new(sender.clone()));
    let worker = Arc::new(ChannelWorker::new(Arc::new(broker.clone()), registry, stat_tx));
    worker
        .start(WorkerQueues::new("dispatch", "", "failed"), cancel.child_token())
        .await?;

    let accepted = admission
        .process_notification(vec![
            Notification::new(event.event_uuid, vec![person], 3)
                .with_params(vec![MessageParam::new("code", "4821")]),
        ])
        .await?;

    let stat = tokio::time::timeout(Duration::from_secs(2), stat_rx.recv())
        .await?
        .expect("stat recorded");

    assert_eq!(stat.status, StatStatus::Sent);
    assert_eq!(stat.notification_uuid, accepted[0]);
    assert_eq!(stat.person_uuid, person);
    assert_eq!(
        sender.sent.lock().clone(),
        vec![("Code 4821".to_string(), "+15550009".to_string())]
    );

    cancel.cancel();
    Ok(())
}

/// Test: Stop lets the in-flight notification finish before closing the broker
#[tokio::test]
async fn test_stop_waits_for_in_flight_publish() -> Result<()> {
    let catalog = Catalog::new();
    let event = catalog.event(&["sms"], 0);
    catalog.template(event.event_uuid, "sms", "Reminder");

    let person = Uuid::new_v4();
    let vault = FakeVault::default().with_person(person, &[("sms", "+15550042")]);
    let gateway = Arc::new(SlowGateway::new(
        catalog.facade(vault),
        Duration::from_millis(150),
    ));

    let memory = MemoryBroker::new();
    let broker = ReconnectingBroker::new(memory.clone());
    let reconnects = broker.reconnects.clone();

    let (tx, rx) = mpsc::channel(1);
    let dispatcher = Arc::new(Dispatcher::new(
        rx,
        gateway,
        Arc::new(broker),
        "dispatch",
        CancellationToken::new(),
    ));
    dispatcher.start().await?;

    tx.send(Notification::new(event.event_uuid, vec![person], 0))
        .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(2), dispatcher.stop()).await?;

    assert_eq!(reconnects.load(Ordering::SeqCst), 0);
    assert!(!memory.is_connected());

    let mut stream = memory.consume("dispatch").await?;
    let message: Message = next_payload(&mut stream).await?;
    assert_eq!(message.person_uuid, person);

    Ok(())
}
