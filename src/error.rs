use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("client {0} is outside the trusted subnet")]
    Forbidden(String),

    #[error("admission queue is closed")]
    AdmissionClosed,

    #[error("message broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("delivery rejected by {backend}: {reason}")]
    DeliveryRejected { backend: String, reason: String },
}
