//! Application Layer
//!
//! Use cases that tie the catalog port to the DNS rendering services.

mod dns_router;
mod resolution_engine;

pub use dns_router::{address_records, DnsReply, DnsRouter, Transport, MAX_STREAM_PAYLOAD, MIN_UDP_PAYLOAD};
pub use resolution_engine::{Resolution, ResolutionEngine};
