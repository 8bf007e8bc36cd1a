//! Value Objects - Immutable lookup primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Which catalog index a question targets.
///
/// Determined from the lookup-kind label of the question name
/// (`web.service.consul` is a `Service` lookup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupType {
    /// Healthy instances of a named service
    Service,
    /// A single catalog node
    Node,
    /// A prepared query executed by name
    PreparedQuery,
    /// Service-mesh proxies for a destination service
    Connect,
    /// Ingress gateways exposing a service
    Ingress,
    /// The virtual IP assigned to a service
    VirtualIP,
    /// An address spelled out in hex (`0a000001.addr.consul`); needs no catalog
    Addr,
}

impl LookupType {
    /// Map a lookup-kind label to a lookup type.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "service" => Some(Self::Service),
            "node" => Some(Self::Node),
            "query" => Some(Self::PreparedQuery),
            "connect" => Some(Self::Connect),
            "ingress" => Some(Self::Ingress),
            "virtual" => Some(Self::VirtualIP),
            "addr" => Some(Self::Addr),
            _ => None,
        }
    }

    /// The label used for this lookup type in a question name.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Node => "node",
            Self::PreparedQuery => "query",
            Self::Connect => "connect",
            Self::Ingress => "ingress",
            Self::VirtualIP => "virtual",
            Self::Addr => "addr",
        }
    }
}

impl std::fmt::Display for LookupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// Tenancy qualifiers scoping a lookup inside a multi-tenant catalog.
///
/// Empty fields mean "not specified"; fetchers fill defaults in
/// `normalize_request`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryTenancy {
    pub namespace: Option<String>,
    pub partition: Option<String>,
    pub datacenter: Option<String>,
    pub peer: Option<String>,
}

/// What kind of catalog entry a result is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    /// An alias that must be re-resolved using `service.address` as the new
    /// question name. Never rendered directly.
    Virtual,
    Node,
    Service,
    Cluster,
}

/// Hex label naming an address: 8 digits for IPv4, 32 for IPv6.
pub fn addr_label(ip: IpAddr) -> String {
    let octets: Vec<u8> = match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    octets.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a label produced by [`addr_label`].
pub fn parse_addr_label(label: &str) -> Option<IpAddr> {
    if !label.is_ascii() {
        return None;
    }
    let bytes = (0..label.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(label.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;

    match bytes.len() {
        4 if label.len() == 8 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 if label.len() == 32 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
