//! service-dns Library
//!
//! DNS resolution core for a service-discovery catalog, exposed for the
//! binary, for integration tests and for embedding.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::{DnsHandler, DnsServer};
pub use adapters::outbound::DashMapCatalog;
pub use application::{DnsReply, DnsRouter, ResolutionEngine, Transport};
pub use config::{load_config, Config, DnsConfig};
pub use domain::entities::{CatalogResult, Endpoints, Location, QueryPayload, ResolvedEndpoint};
pub use domain::errors::{ErrorKind, FetchError, ResolveError, ValidationError};
pub use domain::ports::{CatalogDataFetcher, FetchContext};
pub use domain::services::{QueryParser, RecordRenderer, SoaBuilder};
pub use domain::value_objects::{LookupType, QueryTenancy, ResultType};

use std::sync::Arc;

/// Wire a router from configuration and a catalog backend.
pub fn build_router(dns: &DnsConfig, fetcher: Arc<dyn CatalogDataFetcher>) -> DnsRouter {
    let engine = ResolutionEngine::new(
        fetcher,
        QueryParser::new(&dns.domain, dns.alt_domain.as_deref()),
        dns.max_alias_depth,
        dns.request_timeout,
    );
    DnsRouter::new(engine, dns)
}
