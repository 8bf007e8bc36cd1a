//! SOA Builder Service
//!
//! Builds the authoritative SOA record returned in the authority section when
//! a question has no answer.

use crate::domain::services::record_renderer::fqdn;
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{RData, Record};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// SOA timers in seconds.
///
/// `min_ttl` doubles as the TTL of the SOA record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SoaTimers {
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub min_ttl: u32,
}

impl Default for SoaTimers {
    fn default() -> Self {
        Self {
            refresh: 1,
            retry: 2,
            expire: 3,
            min_ttl: 4,
        }
    }
}

/// Builds negative-answer SOA records.
#[derive(Debug, Clone, Default)]
pub struct SoaBuilder {
    timers: SoaTimers,
}

impl SoaBuilder {
    pub fn new(timers: SoaTimers) -> Self {
        Self { timers }
    }

    pub fn timers(&self) -> SoaTimers {
        self.timers
    }

    /// SOA for `zone` with the current unix time as serial.
    pub fn build(&self, zone: &str) -> Option<Record> {
        let serial = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        self.build_with_serial(zone, serial)
    }

    /// SOA for `zone` with an explicit serial.
    pub fn build_with_serial(&self, zone: &str, serial: u32) -> Option<Record> {
        let zone_name = fqdn(zone)?;
        let ns = fqdn(&format!("ns.{}", zone.trim_end_matches('.')))?;
        let mbox = fqdn(&format!("hostmaster.{}", zone.trim_end_matches('.')))?;

        let soa = SOA::new(
            ns,
            mbox,
            serial,
            saturating_i32(self.timers.refresh),
            saturating_i32(self.timers.retry),
            saturating_i32(self.timers.expire),
            self.timers.min_ttl,
        );
        Some(Record::from_rdata(zone_name, self.timers.min_ttl, RData::SOA(soa)))
    }
}

fn saturating_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}
