//! HTTP route handlers.

pub mod dead_letters;
pub mod health;
pub mod metrics;
pub mod notifications;
pub mod orders;
