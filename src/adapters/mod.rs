//! Adapters Layer
//!
//! Inbound adapters drive the application (DNS transport); outbound adapters
//! implement domain ports (catalog backends).

pub mod inbound;
pub mod outbound;
