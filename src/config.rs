use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue_name: String,
    #[serde(default = "default_failed_queue")]
    pub failed_queue_name: String,
    #[serde(default)]
    pub success_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub contact_vault_url: String,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub delivery_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub stat_queue_capacity: usize,

    pub redis_url: Option<String>,
    pub database_url: Option<String>,

    #[serde(default)]
    pub twilio_account_sid: String,
    #[serde(default)]
    pub twilio_auth_token: String,
    #[serde(default)]
    pub twilio_sender_phone: String,
    #[serde(default = "default_twilio_base_url")]
    pub twilio_base_url: String,

    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_login: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default)]
    pub mail_sender_address: String,
    #[serde(default = "default_mail_subject")]
    pub mail_subject: String,

    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_timeout")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// CIDR allowed to reach `/api/v1`, matched against `X-Real-IP`.
    #[serde(default)]
    pub trusted_subnet: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_dispatch_queue() -> String {
    "dispatch".to_string()
}

fn default_failed_queue() -> String {
    "failed".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_lookup_timeout_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_mail_subject() -> String {
    "Notification".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_circuit_timeout() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    2
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5000
}

fn default_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            timeout_seconds: self.circuit_breaker_timeout_seconds,
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}
