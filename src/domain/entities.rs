//! Domain Entities - Core lookup objects
//!
//! These entities describe what a DNS question asks the catalog for and what
//! the catalog answers. They carry no DNS wire types and no I/O.

use crate::domain::value_objects::{parse_addr_label, QueryTenancy, ResultType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// The normalized subject of a lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryPayload {
    /// Service, node or query name (without kind label or domain)
    pub name: String,
    /// Optional service tag filter
    pub tag: Option<String>,
    pub tenancy: QueryTenancy,
}

impl QueryPayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_tenancy(mut self, tenancy: QueryTenancy) -> Self {
        self.tenancy = tenancy;
        self
    }
}

/// A named endpoint: either a service instance or the node hosting it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    /// IP literal or hostname; may be empty
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub tagged_addresses: HashMap<String, String>,
}

impl Location {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: None,
            tagged_addresses: HashMap::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// The address parsed as an IP literal, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.address.parse().ok()
    }
}

/// The fetcher's unit of answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogResult {
    pub result_type: ResultType,
    pub service: Option<Location>,
    pub node: Option<Location>,
    /// SRV weight
    pub weight: Option<u16>,
    /// Per-result TTL override in seconds
    pub ttl: Option<u32>,
}

impl CatalogResult {
    pub fn new(result_type: ResultType) -> Self {
        Self {
            result_type,
            service: None,
            node: None,
            weight: None,
            ttl: None,
        }
    }

    pub fn with_service(mut self, service: Location) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_node(mut self, node: Location) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_weight(mut self, weight: u16) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn is_virtual(&self) -> bool {
        self.result_type == ResultType::Virtual
    }
}

/// Outcome of a successful fetch.
///
/// `NoData` means the subject exists but has no resolvable endpoints; it is
/// the trigger for an authoritative negative answer, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoints {
    Found(Vec<CatalogResult>),
    NoData,
}

impl Endpoints {
    /// Collapse an empty `Found` into `NoData`.
    pub fn from_results(results: Vec<CatalogResult>) -> Self {
        if results.is_empty() {
            Self::NoData
        } else {
            Self::Found(results)
        }
    }

    /// The one node an `addr` label spells out, or `None` if it does not decode.
    pub fn for_addr(label: &str) -> Option<Self> {
        let ip = parse_addr_label(label)?;
        Some(Self::Found(vec![CatalogResult::new(ResultType::Node)
            .with_node(Location::new(label, ip.to_string()))]))
    }
}

/// A terminal result produced by the resolution engine.
///
/// `aliases` lists the names followed to reach this result, in order, starting
/// with the first alias target (the question name itself is not included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub result: CatalogResult,
    pub aliases: Vec<String>,
}

impl ResolvedEndpoint {
    pub fn direct(result: CatalogResult) -> Self {
        Self {
            result,
            aliases: Vec::new(),
        }
    }

    /// The name the terminal result was resolved under, if reached via an alias.
    pub fn terminal_alias(&self) -> Option<&str> {
        self.aliases.last().map(String::as_str)
    }
}
