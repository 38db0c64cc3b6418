pub mod broker;
pub mod circuit_breaker;
pub mod contact_vault;
pub mod database;
pub mod health;
pub mod mail;
pub mod rbmq;
pub mod sms;
