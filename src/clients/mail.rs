use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::{config::Config, services::worker::ChannelSender};

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub sender_address: String,
    pub subject: String,
}

impl SmtpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            login: config.smtp_login.clone(),
            password: config.smtp_password.clone(),
            sender_address: config.mail_sender_address.clone(),
            subject: config.mail_subject.clone(),
        }
    }
}

/// Mail delivery over SMTP with implicit TLS and login authentication.
pub struct MailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    subject: String,
}

impl MailSender {
    pub fn new(settings: SmtpSettings) -> Result<Self, Error> {
        let sender: Mailbox = settings
            .sender_address
            .parse()
            .map_err(|e| anyhow!("Invalid mail sender address: {}", e))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .map_err(|e| anyhow!("Failed to configure SMTP relay {}: {}", settings.host, e))?
            .port(settings.port)
            .credentials(Credentials::new(settings.login, settings.password))
            .build();

        info!(host = %settings.host, port = settings.port, "Mail sender initialized");

        Ok(Self {
            transport,
            sender,
            subject: settings.subject,
        })
    }

    pub fn build_message(&self, text: &str, destination: &str) -> Result<Message, Error> {
        let recipient: Mailbox = destination
            .parse()
            .map_err(|e| anyhow!("Invalid mail destination {}: {}", destination, e))?;

        Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(text.to_string())
            .map_err(|e| anyhow!("Failed to build mail message: {}", e))
    }
}

#[async_trait]
impl ChannelSender for MailSender {
    async fn send(&self, text: &str, destination: &str) -> Result<(), Error> {
        let message = self.build_message(text, destination)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| anyhow!("SMTP send failed: {}", e))?;

        debug!(destination, code = %response.code(), "Mail accepted by SMTP server");

        Ok(())
    }
}
