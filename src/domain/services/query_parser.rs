//! Query Parser - question name to lookup request
//!
//! Decomposes `<subject>.<kind>[.<qualifiers>].<domain>.` into a
//! [`QueryPayload`] and a [`LookupType`]. Pure string work, no I/O.

use crate::domain::entities::QueryPayload;
use crate::domain::errors::ResolveError;
use crate::domain::value_objects::{LookupType, QueryTenancy};

/// A question name split into its lookup parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuestion {
    pub payload: QueryPayload,
    pub lookup_type: LookupType,
    /// The served domain the name fell under (no trailing dot)
    pub zone: String,
}

/// Parses question names for the served domains.
#[derive(Debug, Clone)]
pub struct QueryParser {
    domain: String,
    alt_domain: Option<String>,
}

impl QueryParser {
    pub fn new(domain: &str, alt_domain: Option<&str>) -> Self {
        Self {
            domain: normalize_domain(domain),
            alt_domain: alt_domain.map(normalize_domain).filter(|d| !d.is_empty()),
        }
    }

    /// The primary served domain, without trailing dot.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Find the served domain `name` belongs to.
    ///
    /// Returns the matched zone, or `None` for names outside every served domain.
    pub fn zone_of(&self, name: &str) -> Option<&str> {
        let name = normalize_domain(name);
        self.split_zone(&name).map(|(_, zone)| zone)
    }

    /// Parse a question name.
    pub fn parse(&self, qname: &str) -> Result<ParsedQuestion, ResolveError> {
        let name = normalize_domain(qname);
        let (prefix, zone) = self
            .split_zone(&name)
            .ok_or_else(|| ResolveError::NotAuthoritative(qname.to_string()))?;

        if prefix.is_empty() {
            return Err(ResolveError::malformed(qname, "missing lookup kind"));
        }

        let mut labels: Vec<&str> = prefix.split('.').collect();
        if labels.iter().any(|l| l.is_empty()) {
            return Err(ResolveError::malformed(qname, "empty label"));
        }

        let mut tenancy = QueryTenancy::default();

        // Qualifier pairs (`<value>.<qualifier>`) are read from the right.
        // At least a subject and a kind label must remain.
        while labels.len() >= 4 {
            let qualifier = labels[labels.len() - 1];
            let value = labels[labels.len() - 2];
            let slot = match qualifier {
                "dc" => &mut tenancy.datacenter,
                "ns" => &mut tenancy.namespace,
                "ap" => &mut tenancy.partition,
                "peer" => &mut tenancy.peer,
                _ => break,
            };
            if slot.is_some() {
                return Err(ResolveError::malformed(
                    qname,
                    format!("duplicate {} qualifier", qualifier),
                ));
            }
            *slot = Some(value.to_string());
            labels.truncate(labels.len() - 2);
        }

        let last = labels[labels.len() - 1];
        let lookup_type = match LookupType::from_label(last) {
            Some(lt) => {
                labels.pop();
                lt
            }
            None => {
                // Legacy form: `<subject>.<kind>.<datacenter>`
                let qualified = tenancy != QueryTenancy::default();
                let kind = if labels.len() >= 3 && !qualified {
                    LookupType::from_label(labels[labels.len() - 2])
                } else {
                    None
                };
                match kind {
                    Some(lt) => {
                        tenancy.datacenter = Some(last.to_string());
                        labels.truncate(labels.len() - 2);
                        lt
                    }
                    None => {
                        return Err(ResolveError::malformed(qname, "unknown lookup kind"));
                    }
                }
            }
        };

        if labels.is_empty() {
            return Err(ResolveError::malformed(qname, "missing subject"));
        }

        let payload = subject_payload(qname, lookup_type, &labels)?.with_tenancy(tenancy);

        Ok(ParsedQuestion {
            payload,
            lookup_type,
            zone: zone.to_string(),
        })
    }

    fn split_zone<'n>(&self, name: &'n str) -> Option<(&'n str, &str)> {
        std::iter::once(self.domain.as_str())
            .chain(self.alt_domain.as_deref())
            .find_map(|zone| {
                if name == zone {
                    Some(("", zone))
                } else {
                    name.strip_suffix(zone)
                        .and_then(|rest| rest.strip_suffix('.'))
                        .map(|prefix| (prefix, zone))
                }
            })
    }
}

fn subject_payload(
    qname: &str,
    lookup_type: LookupType,
    labels: &[&str],
) -> Result<QueryPayload, ResolveError> {
    match (lookup_type, labels) {
        (LookupType::PreparedQuery, _) => Ok(QueryPayload::new(labels.join("."))),
        (_, [subject]) => Ok(QueryPayload::new(*subject)),
        (LookupType::Service, [first, second]) => {
            match (first.strip_prefix('_'), second.strip_prefix('_')) {
                // RFC 2782: `_<service>._<tag>`; `_tcp` carries no tag
                (Some(service), Some(tag)) => {
                    let payload = QueryPayload::new(service);
                    if tag == "tcp" {
                        Ok(payload)
                    } else {
                        Ok(payload.with_tag(tag))
                    }
                }
                _ => Ok(QueryPayload::new(*second).with_tag(*first)),
            }
        }
        _ => Err(ResolveError::malformed(
            qname,
            format!("too many labels for {} lookup", lookup_type),
        )),
    }
}

fn normalize_domain(name: &str) -> String {
    name.trim_matches('.').to_ascii_lowercase()
}
