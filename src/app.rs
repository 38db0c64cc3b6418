use std::sync::Arc;

use anyhow::{Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    api::{AppState, parse_trusted_subnet, run_api_server},
    clients::{
        broker::MessageBroker,
        circuit_breaker::{CircuitBreaker, CircuitStore, MemoryCircuitStore, RedisCircuitStore},
        contact_vault::GrpcContactVault,
        database::PostgresStatStorage,
        health::HealthChecker,
        mail::{MailSender, SmtpSettings},
        rbmq::RabbitMqClient,
        sms::{SmsSender, TwilioSettings},
    },
    config::Config,
    services::{
        admission::AdmissionService,
        catalog::{EventStore, TemplateStore},
        dispatcher::Dispatcher,
        gateway::ServiceFacade,
        stat::{MemoryStatStorage, StatService, StatStorage},
        worker::{ChannelRegistry, ChannelWorker, WorkerQueues},
    },
};

pub struct App {
    config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn circuit_store(&self) -> Result<Arc<dyn CircuitStore>, Error> {
        match &self.config.redis_url {
            Some(url) => Ok(Arc::new(RedisCircuitStore::connect(url).await?)),
            None => {
                info!("REDIS_URL not set, circuit breaker state kept in memory");
                Ok(Arc::new(MemoryCircuitStore::new()))
            }
        }
    }

    async fn stat_storage(&self) -> Result<Arc<dyn StatStorage>, Error> {
        match &self.config.database_url {
            Some(url) => Ok(Arc::new(PostgresStatStorage::connect(url).await?)),
            None => {
                info!("DATABASE_URL not set, delivery stats kept in memory");
                Ok(Arc::new(MemoryStatStorage::new()))
            }
        }
    }

    fn channel_registry(&self, sms_breaker: CircuitBreaker) -> Result<ChannelRegistry, Error> {
        let registry = ChannelRegistry::new();

        let sms = SmsSender::new(
            TwilioSettings::from_config(&self.config),
            self.config.retry_config(),
            sms_breaker,
        )?;
        registry.register("sms", Arc::new(sms));

        match MailSender::new(SmtpSettings::from_config(&self.config)) {
            Ok(mail) => {
                registry.register("mail", Arc::new(mail));
            }
            Err(e) => warn!(error = %e, "Mail backend not configured, mail channel disabled"),
        }

        Ok(registry)
    }

    pub async fn run(self) -> Result<(), Error> {
        let config = &self.config;
        let cancel = CancellationToken::new();

        let circuit_store = self.circuit_store().await?;
        let breaker_config = config.circuit_breaker_config();
        let vault_breaker = CircuitBreaker::new(
            "contact_vault",
            Arc::clone(&circuit_store),
            breaker_config.clone(),
        );
        let sms_breaker = CircuitBreaker::new("sms", Arc::clone(&circuit_store), breaker_config);

        let contact_vault = GrpcContactVault::connect_lazy(
            &config.contact_vault_url,
            config.lookup_timeout(),
            vault_breaker.clone(),
        )?;

        let events = Arc::new(EventStore::new());
        let templates = Arc::new(TemplateStore::new());
        let gateway = Arc::new(ServiceFacade::new(
            Arc::new(contact_vault),
            events.clone(),
            templates.clone(),
            config.lookup_timeout(),
        ));

        let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_queue_capacity);
        let (stat_tx, stat_rx) = mpsc::channel(config.stat_queue_capacity);

        let stats = Arc::new(StatService::new(self.stat_storage().await?));
        let stat_handle = stats.start(stat_rx, cancel.child_token());

        let admission = Arc::new(AdmissionService::new(delivery_tx));
        admission.start();

        let dispatch_broker: Arc<dyn MessageBroker> =
            Arc::new(RabbitMqClient::from_config(config));
        let dispatcher = Arc::new(Dispatcher::new(
            delivery_rx,
            gateway,
            dispatch_broker.clone(),
            config.dispatch_queue_name.clone(),
            cancel.child_token(),
        ));
        dispatcher.start().await?;

        let worker_broker: Arc<dyn MessageBroker> = Arc::new(RabbitMqClient::from_config(config));
        let registry = Arc::new(self.channel_registry(sms_breaker.clone())?);
        let worker = Arc::new(ChannelWorker::new(worker_broker.clone(), registry, stat_tx));
        let worker_handle = worker
            .start(
                WorkerQueues::new(
                    config.dispatch_queue_name.clone(),
                    config.success_queue_name.clone(),
                    config.failed_queue_name.clone(),
                ),
                cancel.child_token(),
            )
            .await?;

        let state = Arc::new(AppState {
            admission: admission.clone(),
            events,
            templates,
            stats: stats.clone(),
            health_checker: HealthChecker::new(stats.storage(), vec![vault_breaker, sms_breaker])
                .with_broker("dispatch_broker", dispatch_broker)
                .with_broker("worker_broker", worker_broker.clone()),
            trusted_subnet: parse_trusted_subnet(&config.trusted_subnet),
        });

        let mut server = tokio::spawn(run_api_server(
            state,
            config.server_port,
            cancel.child_token(),
        ));

        info!("Notification service running");

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
            }
            result = &mut server => {
                match result {
                    Ok(Ok(())) => warn!("HTTP server exited"),
                    Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                    Err(e) => error!(error = %e, "HTTP server task panicked"),
                }
            }
        }

        admission.stop();
        dispatcher.stop().await;
        worker.stop();
        cancel.cancel();

        for (name, handle) in [("channel worker", worker_handle), ("stat collector", stat_handle)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Task ended abnormally");
            }
        }

        // Closed only once its consumer loop has exited, so nothing resubscribes.
        worker_broker.close().await;

        if !server.is_finished() {
            server.abort();
        }

        info!("Notification service stopped");
        Ok(())
    }
}
