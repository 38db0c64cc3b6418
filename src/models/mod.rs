pub mod circuit_breaker;
pub mod contact;
pub mod event;
pub mod health;
pub mod message;
pub mod notification;
pub mod response;
pub mod retry;
pub mod stat;
pub mod template;
pub mod validation;
