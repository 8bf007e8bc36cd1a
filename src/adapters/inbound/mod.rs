mod dns_server;

pub use dns_server::{answer_packet, DnsHandler, DnsServer};
