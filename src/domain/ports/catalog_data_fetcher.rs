//! Catalog Data Fetcher Port
//!
//! Defines the interface the resolver uses to read the service catalog.
//! Implementations may back onto the local catalog, prepared-query execution
//! or a virtual-IP table.

use crate::domain::entities::{Endpoints, QueryPayload};
use crate::domain::errors::{FetchError, ValidationError};
use crate::domain::value_objects::LookupType;
use async_trait::async_trait;
use tokio::time::Instant;

/// Per-request context handed to every fetch.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Point in time after which the caller stops waiting.
    pub deadline: Instant,
}

impl FetchContext {
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    /// Time left before the deadline, saturating at zero.
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Source of catalog endpoints for DNS lookups.
///
/// This is an outbound port: the resolution engine depends on it without
/// knowing which backend sits behind it. Implementations must be safe to call
/// from many concurrent requests.
#[async_trait]
pub trait CatalogDataFetcher: Send + Sync {
    /// Sanity-check a payload before it is used. A rejection aborts the
    /// question with `FormErr`.
    fn validate_request(
        &self,
        lookup_type: LookupType,
        payload: &QueryPayload,
    ) -> Result<(), ValidationError>;

    /// Fill backend defaults (datacenter, namespace, ...) in place.
    fn normalize_request(&self, payload: &mut QueryPayload);

    /// Fetch the endpoints for a payload.
    ///
    /// Returns `Endpoints::NoData` when the subject exists but nothing is
    /// resolvable. Callers drop the returned future on deadline, so
    /// implementations must be cancel-safe.
    async fn fetch_endpoints(
        &self,
        ctx: &FetchContext,
        payload: &QueryPayload,
        lookup_type: LookupType,
    ) -> Result<Endpoints, FetchError>;
}
