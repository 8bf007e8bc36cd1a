//! DashMap Catalog
//!
//! Implements CatalogDataFetcher over an in-memory service catalog held in
//! DashMaps. The catalog can be seeded from a JSON file and periodically
//! reloaded from it.

use crate::domain::entities::{CatalogResult, Endpoints, Location, QueryPayload};
use crate::domain::errors::{FetchError, ValidationError};
use crate::domain::ports::{CatalogDataFetcher, FetchContext};
use crate::domain::value_objects::{LookupType, ResultType};
use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::Duration;

/// Tenancy value used when a question leaves namespace or partition unset.
pub const DEFAULT_TENANCY: &str = "default";

/// A catalog node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogNode {
    pub name: String,
    pub address: String,
    /// Owning datacenter; the catalog's local datacenter when unset
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default)]
    pub tagged_addresses: HashMap<String, String>,
}

/// What a registered service instance is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    #[default]
    Typical,
    /// Mesh sidecar; `destination` names the service it fronts
    ConnectProxy,
    /// Gateway; `upstreams` lists the services it exposes
    IngressGateway,
}

/// A registered service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogService {
    pub id: String,
    pub name: String,
    /// Name of the hosting node
    pub node: String,
    /// Service address; the node address applies when empty
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub weight: Option<u16>,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub kind: ServiceKind,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub upstreams: Vec<String>,
    /// DNS name this service is an alias for
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
    /// Peer cluster the instance was imported from
    #[serde(default)]
    pub peer: Option<String>,
}

fn default_healthy() -> bool {
    true
}

impl CatalogService {
    pub fn new(id: impl Into<String>, name: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node: node.into(),
            address: String::new(),
            port: None,
            tags: Vec::new(),
            healthy: true,
            weight: None,
            ttl: None,
            kind: ServiceKind::Typical,
            destination: None,
            upstreams: Vec::new(),
            alias: None,
            namespace: None,
            partition: None,
            peer: None,
        }
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// A named query that resolves to a (possibly tagged) service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedQuery {
    pub name: String,
    pub service: String,
    #[serde(default)]
    pub tag: Option<String>,
}

/// On-disk catalog snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub nodes: Vec<CatalogNode>,
    #[serde(default)]
    pub services: Vec<CatalogService>,
    #[serde(default)]
    pub prepared_queries: Vec<PreparedQuery>,
    /// Service name to virtual IP
    #[serde(default)]
    pub virtual_ips: HashMap<String, String>,
}

impl CatalogSeed {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog seed {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing catalog seed {}", path.display()))
    }
}

/// One generation of catalog contents.
#[derive(Default)]
struct CatalogTables {
    nodes: DashMap<String, CatalogNode>,
    /// Keyed by instance id
    services: DashMap<String, CatalogService>,
    prepared_queries: DashMap<String, PreparedQuery>,
    virtual_ips: DashMap<String, String>,
}

impl CatalogTables {
    fn from_seed(seed: CatalogSeed) -> Self {
        let tables = Self::default();
        for node in seed.nodes {
            tables.nodes.insert(node.name.clone(), node);
        }
        for service in seed.services {
            tables.services.insert(service.id.clone(), service);
        }
        for query in seed.prepared_queries {
            tables.prepared_queries.insert(query.name.clone(), query);
        }
        for (service, vip) in seed.virtual_ips {
            tables.virtual_ips.insert(service, vip);
        }
        tables
    }
}

/// DashMap-backed service catalog.
///
/// Cheap to clone; clones share the same tables. A reload builds a new
/// generation and swaps it in whole, so a lookup never sees a partial one.
#[derive(Clone)]
pub struct DashMapCatalog {
    datacenter: String,
    current: Arc<RwLock<Arc<CatalogTables>>>,
}

impl DashMapCatalog {
    /// Create an empty catalog for the local datacenter.
    pub fn new(datacenter: impl Into<String>) -> Self {
        Self {
            datacenter: datacenter.into(),
            current: Arc::new(RwLock::new(Arc::new(CatalogTables::default()))),
        }
    }

    pub fn from_seed(datacenter: impl Into<String>, seed: CatalogSeed) -> Self {
        let catalog = Self::new(datacenter);
        catalog.replace(seed);
        catalog
    }

    /// Load a catalog from a JSON seed file.
    pub fn load_file(datacenter: impl Into<String>, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let seed = CatalogSeed::from_file(path.as_ref())?;
        Ok(Self::from_seed(datacenter, seed))
    }

    /// Start the background reload task.
    ///
    /// Re-reads the seed file every `interval`; a failed read keeps the
    /// current contents.
    pub fn start_reload(&self, path: PathBuf, interval: Duration) {
        let catalog = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let seed_path = path.clone();
                match tokio::task::spawn_blocking(move || CatalogSeed::from_file(&seed_path)).await {
                    Ok(Ok(seed)) => {
                        catalog.replace(seed);
                        tracing::debug!(
                            "catalog reload ok, nodes={} services={}",
                            catalog.node_count(),
                            catalog.service_count()
                        );
                    }
                    Ok(Err(e)) => tracing::error!("catalog reload failed: {:?}", e),
                    Err(e) => tracing::error!("catalog reload task failed: {:?}", e),
                }
            }
        });
    }

    /// Replace the whole catalog with a snapshot.
    pub fn replace(&self, seed: CatalogSeed) {
        let tables = Arc::new(CatalogTables::from_seed(seed));
        *self.current.write() = tables;
    }

    fn tables(&self) -> Arc<CatalogTables> {
        self.current.read().clone()
    }

    fn view(&self) -> CatalogView<'_> {
        CatalogView {
            datacenter: &self.datacenter,
            tables: self.tables(),
        }
    }

    pub fn register_node(&self, node: CatalogNode) {
        self.tables().nodes.insert(node.name.clone(), node);
    }

    pub fn register_service(&self, service: CatalogService) {
        self.tables().services.insert(service.id.clone(), service);
    }

    pub fn deregister_service(&self, id: &str) -> Option<CatalogService> {
        self.tables().services.remove(id).map(|(_, s)| s)
    }

    pub fn register_prepared_query(&self, query: PreparedQuery) {
        self.tables().prepared_queries.insert(query.name.clone(), query);
    }

    pub fn set_virtual_ip(&self, service: impl Into<String>, vip: impl Into<String>) {
        self.tables().virtual_ips.insert(service.into(), vip.into());
    }

    pub fn node_count(&self) -> usize {
        self.tables().nodes.len()
    }

    pub fn service_count(&self) -> usize {
        self.tables().services.len()
    }

    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }
}

/// Lookups against one generation of the tables.
struct CatalogView<'c> {
    datacenter: &'c str,
    tables: Arc<CatalogTables>,
}

impl CatalogView<'_> {
    fn node_datacenter<'a>(&'a self, node: &'a CatalogNode) -> &'a str {
        node.datacenter.as_deref().unwrap_or(self.datacenter)
    }

    /// Whether a service instance is visible under the payload's tenancy.
    fn in_scope(&self, service: &CatalogService, payload: &QueryPayload) -> bool {
        let tenancy = &payload.tenancy;
        let namespace = service.namespace.as_deref().unwrap_or(DEFAULT_TENANCY);
        let partition = service.partition.as_deref().unwrap_or(DEFAULT_TENANCY);
        if tenancy.namespace.as_deref().is_some_and(|ns| ns != namespace)
            || tenancy.partition.as_deref().is_some_and(|ap| ap != partition)
            || tenancy.peer != service.peer
        {
            return false;
        }
        if service.peer.is_some() {
            return true;
        }

        let Some(dc) = tenancy.datacenter.as_deref() else {
            return true;
        };
        self.tables.nodes
            .get(&service.node)
            .map(|n| self.node_datacenter(n.value()) == dc)
            .unwrap_or(false)
    }

    fn known_datacenter(&self, dc: &str) -> bool {
        dc == self.datacenter || self.tables.nodes.iter().any(|n| self.node_datacenter(n.value()) == dc)
    }

    /// Instances matching `select`, sorted by id.
    fn instances<F>(&self, payload: &QueryPayload, select: F) -> Vec<CatalogService>
    where
        F: Fn(&CatalogService) -> bool,
    {
        let mut found: Vec<CatalogService> = self
            .tables.services
            .iter()
            .filter(|e| select(e.value()) && self.in_scope(e.value(), payload))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    fn service_results(&self, instances: Vec<CatalogService>, tag: Option<&str>) -> Endpoints {
        let results = instances
            .into_iter()
            .filter(|s| s.healthy)
            .filter(|s| tag.map_or(true, |t| s.has_tag(t)))
            .filter_map(|s| self.service_result(&s))
            .collect();
        Endpoints::from_results(results)
    }

    fn service_result(&self, service: &CatalogService) -> Option<CatalogResult> {
        let node = self.tables.nodes.get(&service.node).map(|n| n.value().clone());

        if let Some(target) = &service.alias {
            return Some(
                CatalogResult::new(ResultType::Virtual)
                    .with_service(Location::new(service.name.clone(), target.clone()))
                    .with_node(Location::new(service.node.clone(), target.clone())),
            );
        }

        let Some(node) = node else {
            tracing::warn!("service {} references unknown node {}", service.id, service.node);
            return None;
        };

        let mut location = Location::new(service.name.clone(), service.address.clone());
        location.port = service.port;

        let mut result = CatalogResult::new(ResultType::Service)
            .with_service(location)
            .with_node(node_location(&node));
        result.weight = service.weight;
        result.ttl = service.ttl;
        Some(result)
    }

    fn lookup_service(&self, payload: &QueryPayload, name: &str, tag: Option<&str>) -> Result<Endpoints, FetchError> {
        let instances = self.instances(payload, |s| s.kind == ServiceKind::Typical && s.name == name);
        if instances.is_empty() {
            return Err(FetchError::NotFound(name.to_string()));
        }
        Ok(self.service_results(instances, tag))
    }

    fn lookup_node(&self, payload: &QueryPayload) -> Result<Endpoints, FetchError> {
        let node = self
            .tables.nodes
            .get(&payload.name)
            .filter(|n| {
                payload
                    .tenancy
                    .datacenter
                    .as_deref()
                    .map_or(true, |dc| self.node_datacenter(n.value()) == dc)
            })
            .map(|n| n.value().clone())
            .ok_or_else(|| FetchError::NotFound(payload.name.clone()))?;

        Ok(Endpoints::Found(vec![
            CatalogResult::new(ResultType::Node).with_node(node_location(&node))
        ]))
    }

    fn lookup_gateway<F>(&self, payload: &QueryPayload, select: F) -> Result<Endpoints, FetchError>
    where
        F: Fn(&CatalogService) -> bool,
    {
        let instances = self.instances(payload, select);
        if instances.is_empty() && !self.tables.services.iter().any(|s| s.name == payload.name) {
            return Err(FetchError::NotFound(payload.name.clone()));
        }
        Ok(self.service_results(instances, None))
    }

    fn lookup_prepared_query(&self, payload: &QueryPayload) -> Result<Endpoints, FetchError> {
        let query = self
            .tables.prepared_queries
            .get(&payload.name)
            .map(|q| q.value().clone())
            .ok_or_else(|| FetchError::NotFound(payload.name.clone()))?;

        match self.lookup_service(payload, &query.service, query.tag.as_deref()) {
            // A query whose service vanished has no data, it still exists.
            Err(FetchError::NotFound(_)) => Ok(Endpoints::NoData),
            other => other,
        }
    }

    fn lookup_virtual_ip(&self, payload: &QueryPayload) -> Result<Endpoints, FetchError> {
        let vip = self
            .tables.virtual_ips
            .get(&payload.name)
            .map(|v| v.value().clone())
            .ok_or_else(|| FetchError::NotFound(payload.name.clone()))?;

        Ok(Endpoints::Found(vec![CatalogResult::new(ResultType::Service)
            .with_service(Location::new(payload.name.clone(), vip))]))
    }
}

fn node_location(node: &CatalogNode) -> Location {
    let mut location = Location::new(node.name.clone(), node.address.clone());
    location.tagged_addresses = node.tagged_addresses.clone();
    location
}

#[async_trait]
impl CatalogDataFetcher for DashMapCatalog {
    fn validate_request(
        &self,
        lookup_type: LookupType,
        payload: &QueryPayload,
    ) -> Result<(), ValidationError> {
        if payload.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if payload.tenancy.peer.is_some() && payload.tenancy.datacenter.is_some() {
            return Err(ValidationError::PeerWithDatacenter);
        }
        if payload.tag.is_some() && lookup_type != LookupType::Service {
            return Err(ValidationError::TagNotSupported(lookup_type));
        }
        Ok(())
    }

    fn normalize_request(&self, payload: &mut QueryPayload) {
        let tenancy = &mut payload.tenancy;
        tenancy
            .namespace
            .get_or_insert_with(|| DEFAULT_TENANCY.to_string());
        tenancy
            .partition
            .get_or_insert_with(|| DEFAULT_TENANCY.to_string());
        if tenancy.peer.is_none() {
            tenancy
                .datacenter
                .get_or_insert_with(|| self.datacenter.clone());
        }
    }

    async fn fetch_endpoints(
        &self,
        _ctx: &FetchContext,
        payload: &QueryPayload,
        lookup_type: LookupType,
    ) -> Result<Endpoints, FetchError> {
        let view = self.view();
        if let Some(dc) = payload.tenancy.datacenter.as_deref() {
            if !view.known_datacenter(dc) {
                return Err(FetchError::Unavailable(format!("no path to datacenter {}", dc)));
            }
        }

        let endpoints = match lookup_type {
            LookupType::Service => {
                view.lookup_service(payload, &payload.name, payload.tag.as_deref())?
            }
            LookupType::Node => view.lookup_node(payload)?,
            LookupType::PreparedQuery => view.lookup_prepared_query(payload)?,
            LookupType::Connect => view.lookup_gateway(payload, |s| {
                s.kind == ServiceKind::ConnectProxy
                    && s.destination.as_deref() == Some(payload.name.as_str())
            })?,
            LookupType::Ingress => view.lookup_gateway(payload, |s| {
                s.kind == ServiceKind::IngressGateway && s.upstreams.contains(&payload.name)
            })?,
            LookupType::VirtualIP => view.lookup_virtual_ip(payload)?,
            LookupType::Addr => Endpoints::for_addr(&payload.name)
                .ok_or_else(|| FetchError::NotFound(payload.name.clone()))?,
        };

        tracing::debug!(
            "catalog {} lookup for {}: {}",
            lookup_type,
            payload.name,
            match &endpoints {
                Endpoints::Found(r) => format!("{} results", r.len()),
                Endpoints::NoData => "no data".to_string(),
            }
        );
        Ok(endpoints)
    }
}
