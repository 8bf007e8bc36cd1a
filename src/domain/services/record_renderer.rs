//! Record Renderer Service
//!
//! Turns terminal catalog results into DNS resource records. Pure function of
//! its inputs: no I/O and no clock.

use crate::domain::entities::{CatalogResult, QueryPayload, ResolvedEndpoint};
use crate::domain::value_objects::{addr_label, LookupType, ResultType};
use hickory_proto::rr::rdata::{A, AAAA, CNAME, SRV};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::collections::HashMap;
use std::net::IpAddr;

/// SRV priority used for every catalog endpoint.
pub const SRV_PRIORITY: u16 = 1;

/// Default TTLs applied when a result carries none.
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    pub node_ttl: u32,
    pub service_ttl: u32,
    /// Per-service overrides; a key ending in `*` matches by prefix.
    pub service_overrides: HashMap<String, u32>,
}

impl TtlPolicy {
    /// TTL for records produced by a lookup of `subject`.
    pub fn ttl_for(&self, lookup_type: LookupType, subject: &str) -> u32 {
        if matches!(lookup_type, LookupType::Node | LookupType::Addr) {
            return self.node_ttl;
        }

        if let Some(ttl) = self.service_overrides.get(subject) {
            return *ttl;
        }

        // Longest wildcard prefix wins
        self.service_overrides
            .iter()
            .filter_map(|(pattern, ttl)| {
                let prefix = pattern.strip_suffix('*')?;
                subject.starts_with(prefix).then_some((prefix.len(), *ttl))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, ttl)| ttl)
            .unwrap_or(self.service_ttl)
    }
}

/// What a question is being answered for.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    /// Question name, used as owner of the head record
    pub qname: &'a Name,
    pub qtype: RecordType,
    pub lookup_type: LookupType,
    pub payload: &'a QueryPayload,
    /// Served domain the question fell under (no trailing dot)
    pub zone: &'a str,
}

/// Records destined for the answer and additional sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedRecords {
    pub answers: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl RenderedRecords {
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

/// Where an endpoint can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Ip(IpAddr),
    Host(String),
}

/// Renders resolved endpoints into resource records.
#[derive(Debug, Clone)]
pub struct RecordRenderer {
    ttl: TtlPolicy,
    /// Maximum address records in the answer section (0 = unlimited)
    a_record_limit: usize,
}

impl RecordRenderer {
    pub fn new(ttl: TtlPolicy, a_record_limit: usize) -> Self {
        Self {
            ttl,
            a_record_limit,
        }
    }

    /// Render every endpoint for the requested question type.
    ///
    /// Endpoints that cannot be expressed for `qtype` are omitted.
    pub fn render(&self, req: &RenderRequest<'_>, endpoints: &[ResolvedEndpoint]) -> RenderedRecords {
        let default_ttl = self.ttl.ttl_for(req.lookup_type, &req.payload.name);
        let mut out = RenderedRecords::default();
        let mut address_groups = Vec::new();

        for endpoint in endpoints {
            debug_assert!(!endpoint.result.is_virtual());
            let ttl = endpoint.result.ttl.unwrap_or(default_ttl);

            match req.qtype {
                RecordType::A | RecordType::AAAA | RecordType::ANY | RecordType::CNAME => {
                    if let Some(group) = self.render_address(req, endpoint, ttl) {
                        address_groups.push(group);
                    }
                }
                RecordType::SRV if !matches!(req.lookup_type, LookupType::Node | LookupType::Addr) => {
                    self.render_srv(req, endpoint, ttl, &mut out);
                }
                _ => {}
            }
        }

        out.answers.extend(self.limit_address_groups(address_groups));
        dedup(&mut out.answers);
        dedup(&mut out.additionals);
        out
    }

    /// Records answering one endpoint: the CNAME chain of its aliases, then
    /// the terminal record. `None` when nothing matches the question type.
    fn render_address(
        &self,
        req: &RenderRequest<'_>,
        endpoint: &ResolvedEndpoint,
        ttl: u32,
    ) -> Option<Vec<Record>> {
        let target = target_of(&endpoint.result, req.lookup_type);

        // Owner of the terminal record: the question name, or the last alias.
        let mut chain = Vec::new();
        let mut owner = req.qname.clone();
        for alias in &endpoint.aliases {
            let Some(next) = fqdn(alias) else {
                tracing::warn!("alias target {:?} is not a valid name", alias);
                return None;
            };
            chain.push(Record::from_rdata(owner, ttl, RData::CNAME(CNAME(next.clone()))));
            owner = next;
        }

        let terminal = match (target, req.qtype) {
            (Some(Target::Ip(IpAddr::V4(ip))), RecordType::A | RecordType::ANY) => {
                Some(Record::from_rdata(owner, ttl, RData::A(A(ip))))
            }
            (Some(Target::Ip(IpAddr::V6(ip))), RecordType::AAAA | RecordType::ANY) => {
                Some(Record::from_rdata(owner, ttl, RData::AAAA(AAAA(ip))))
            }
            (Some(Target::Host(host)), _) => {
                fqdn(&host).map(|h| Record::from_rdata(owner, ttl, RData::CNAME(CNAME(h))))
            }
            _ => None,
        };

        match terminal {
            Some(record) => {
                chain.push(record);
                Some(chain)
            }
            None if req.qtype == RecordType::CNAME && !chain.is_empty() => Some(chain),
            None => None,
        }
    }

    fn render_srv(
        &self,
        req: &RenderRequest<'_>,
        endpoint: &ResolvedEndpoint,
        ttl: u32,
        out: &mut RenderedRecords,
    ) {
        let result = &endpoint.result;
        let target = target_of(result, req.lookup_type);

        let node_ip = result.node.as_ref().and_then(|n| n.ip());
        let target_name = match (endpoint.terminal_alias(), &target) {
            (Some(alias), _) => fqdn(alias),
            (None, Some(Target::Host(host))) => fqdn(host),
            // The service listens somewhere other than its node: name that address.
            (None, Some(Target::Ip(ip))) if Some(*ip) != node_ip => {
                addr_fqdn(*ip, req.payload, req.zone)
            }
            (None, Some(Target::Ip(ip))) => node_fqdn(result, req.payload, req.zone)
                .or_else(|| addr_fqdn(*ip, req.payload, req.zone)),
            (None, None) => node_fqdn(result, req.payload, req.zone),
        };
        let Some(target_name) = target_name else {
            tracing::debug!("no SRV target for result {:?}", result);
            return;
        };

        let port = result
            .service
            .as_ref()
            .and_then(|s| s.port)
            .or_else(|| result.node.as_ref().and_then(|n| n.port))
            .unwrap_or(0);
        let weight = result.weight.unwrap_or(0);

        out.answers.push(Record::from_rdata(
            req.qname.clone(),
            ttl,
            RData::SRV(SRV::new(SRV_PRIORITY, weight, port, target_name.clone())),
        ));

        // Glue for the target
        let glue = match target {
            Some(Target::Ip(IpAddr::V4(ip))) => Some(RData::A(A(ip))),
            Some(Target::Ip(IpAddr::V6(ip))) => Some(RData::AAAA(AAAA(ip))),
            Some(Target::Host(host)) if endpoint.terminal_alias().is_some() => {
                fqdn(&host).map(|h| RData::CNAME(CNAME(h)))
            }
            _ => None,
        };
        if let Some(rdata) = glue {
            out.additionals.push(Record::from_rdata(target_name, ttl, rdata));
        }
    }

    /// Keep whole endpoint groups while their address records fit the limit.
    fn limit_address_groups(&self, groups: Vec<Vec<Record>>) -> Vec<Record> {
        let mut answers: Vec<Record> = Vec::new();
        let mut addresses = 0;
        for group in groups {
            let fresh: Vec<Record> = group.into_iter().filter(|r| !answers.contains(r)).collect();
            let count = fresh
                .iter()
                .filter(|r| matches!(r.record_type(), RecordType::A | RecordType::AAAA))
                .count();
            if self.a_record_limit > 0 && count > 0 && addresses + count > self.a_record_limit {
                continue;
            }
            addresses += count;
            answers.extend(fresh);
        }
        answers
    }
}

/// Pick the reachable address of a terminal result.
///
/// A service address wins only when it is an IP literal; otherwise the node
/// address is used. Node lookups never consult the service location.
fn target_of(result: &CatalogResult, lookup_type: LookupType) -> Option<Target> {
    let node = result.node.as_ref();
    let service = result.service.as_ref().filter(|_| lookup_type != LookupType::Node);

    if let Some(ip) = service.and_then(|s| s.ip()) {
        return Some(Target::Ip(ip));
    }
    if let Some(ip) = node.and_then(|n| n.ip()) {
        return Some(Target::Ip(ip));
    }

    let service_host = match result.result_type {
        ResultType::Service | ResultType::Cluster => service.map(|s| s.address.as_str()),
        _ => None,
    };
    service_host
        .filter(|a| !a.is_empty())
        .or_else(|| node.map(|n| n.address.as_str()).filter(|a| !a.is_empty()))
        .map(|host| Target::Host(host.to_string()))
}

/// `<node>.node[.<dc>].<zone>.`
fn node_fqdn(result: &CatalogResult, payload: &QueryPayload, zone: &str) -> Option<Name> {
    let node = result.node.as_ref().filter(|n| !n.name.is_empty())?;
    let name = match payload.tenancy.datacenter.as_deref() {
        Some(dc) => format!("{}.node.{}.{}", node.name, dc, zone),
        None => format!("{}.node.{}", node.name, zone),
    };
    fqdn(&name)
}

/// `<hex-ip>.addr[.<dc>].<zone>.`
fn addr_fqdn(ip: IpAddr, payload: &QueryPayload, zone: &str) -> Option<Name> {
    let name = match payload.tenancy.datacenter.as_deref() {
        Some(dc) => format!("{}.addr.{}.{}", addr_label(ip), dc, zone),
        None => format!("{}.addr.{}", addr_label(ip), zone),
    };
    fqdn(&name)
}

/// Parse a name as fully qualified.
pub(crate) fn fqdn(name: &str) -> Option<Name> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Name::from_ascii(format!("{}.", trimmed)).ok()
}

fn dedup(records: &mut Vec<Record>) {
    let mut unique: Vec<Record> = Vec::with_capacity(records.len());
    for record in records.drain(..) {
        if !unique.contains(&record) {
            unique.push(record);
        }
    }
    *records = unique;
}
