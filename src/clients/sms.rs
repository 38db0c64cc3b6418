use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    error::NotifyError,
    models::retry::RetryConfig,
    services::worker::ChannelSender,
    utils::retry_with_backoff_when,
};

#[derive(Debug, Clone)]
pub struct TwilioSettings {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub sender_phone: String,
}

impl TwilioSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.twilio_base_url.trim_end_matches('/').to_string(),
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            sender_phone: config.twilio_sender_phone.clone(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: Option<String>,
}

/// SMS delivery through the Twilio Messages API.
pub struct SmsSender {
    http_client: Client,
    settings: TwilioSettings,
    retry_config: RetryConfig,
    circuit_breaker: CircuitBreaker,
}

impl SmsSender {
    pub fn new(
        settings: TwilioSettings,
        retry_config: RetryConfig,
        circuit_breaker: CircuitBreaker,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(account_sid = %settings.account_sid, "SMS sender initialized");

        Ok(Self {
            http_client,
            settings,
            retry_config,
            circuit_breaker,
        })
    }

    async fn send_with_retry(
        http_client: Client,
        settings: TwilioSettings,
        retry_config: RetryConfig,
        text: String,
        destination: String,
    ) -> Result<(), Error> {
        retry_with_backoff_when(&retry_config, Self::is_retryable, || {
            Self::send_once(http_client.clone(), &settings, &text, &destination)
        })
        .await
    }

    /// A rejected request stays rejected however often it is resent.
    fn is_retryable(error: &Error) -> bool {
        !matches!(
            error.downcast_ref::<NotifyError>(),
            Some(NotifyError::DeliveryRejected { .. })
        )
    }

    async fn send_once(
        http_client: Client,
        settings: &TwilioSettings,
        text: &str,
        destination: &str,
    ) -> Result<(), Error> {
        let response = http_client
            .post(settings.messages_url())
            .basic_auth(&settings.account_sid, Some(&settings.auth_token))
            .form(&[
                ("To", destination),
                ("From", settings.sender_phone.as_str()),
                ("Body", text),
            ])
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let body: TwilioMessageResponse = response
                .json()
                .await
                .unwrap_or(TwilioMessageResponse { sid: None });
            debug!(sid = ?body.sid, "SMS accepted by gateway");
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();

            if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                return Err(NotifyError::DeliveryRejected {
                    backend: "sms".to_string(),
                    reason: format!("{}: {}", status, error_text),
                }
                .into());
            }

            Err(anyhow!("SMS gateway returned {}: {}", status, error_text))
        }
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    async fn send(&self, text: &str, destination: &str) -> Result<(), Error> {
        if destination.is_empty() {
            return Err(anyhow!("SMS destination cannot be empty"));
        }

        debug!(destination, "Sending SMS");

        let http_client = self.http_client.clone();
        let settings = self.settings.clone();
        let retry_config = self.retry_config.clone();
        let text = text.to_string();
        let destination = destination.to_string();

        self.circuit_breaker
            .call(|| Self::send_with_retry(http_client, settings, retry_config, text, destination))
            .await
    }
}
