use anyhow::{Result, anyhow};

use crate::models::notification::IncomingNotification;

pub fn validate_incoming_notification(notification: &IncomingNotification) -> Result<()> {
    if notification.event_uuid.is_nil() {
        return Err(anyhow!("Event uuid cannot be nil"));
    }

    if notification.person_uuids.is_empty() {
        return Err(anyhow!("Notification must have at least one recipient"));
    }

    if notification.person_uuids.iter().any(|uuid| uuid.is_nil()) {
        return Err(anyhow!("Recipient uuid cannot be nil"));
    }

    let bad_key = notification
        .message_params
        .iter()
        .find(|param| param.key.is_empty());

    if bad_key.is_some() {
        return Err(anyhow!("Message param key cannot be empty"));
    }

    Ok(())
}

pub fn validate_channel_name(channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(anyhow!("Channel name cannot be empty"));
    }

    let valid_chars = channel
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !valid_chars {
        return Err(anyhow!("Channel name contains invalid characters"));
    }

    Ok(())
}
