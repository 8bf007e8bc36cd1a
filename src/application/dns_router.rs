//! DNS Router - question in, complete response out
//!
//! Classifies a question, runs it through the resolution engine and the
//! record renderer, and finalizes the response: header flags, the negative
//! SOA, answer limits and truncation to the transport budget. Every path
//! ends in a well-formed message.

use crate::application::ResolutionEngine;
use crate::config::DnsConfig;
use crate::domain::errors::{ErrorKind, ResolveError};
use crate::domain::services::{RecordRenderer, RenderRequest, RenderedRecords, SoaBuilder};
use hickory_proto::error::ProtoResult;
use hickory_proto::op::{Edns, Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};

/// Minimum UDP payload every DNS client accepts.
pub const MIN_UDP_PAYLOAD: u16 = 512;

/// Largest message a stream transport can frame.
pub const MAX_STREAM_PAYLOAD: usize = u16::MAX as usize;

/// How the response will travel back to the client, with the EDNS payload
/// size the client advertised, if it sent an OPT record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp { edns_payload: Option<u16> },
    Stream { edns_payload: Option<u16> },
}

impl Transport {
    /// Maximum encoded response size in bytes.
    pub fn size_budget(&self) -> usize {
        match self {
            Self::Udp { edns_payload } => {
                edns_payload.unwrap_or(MIN_UDP_PAYLOAD).max(MIN_UDP_PAYLOAD) as usize
            }
            Self::Stream { .. } => MAX_STREAM_PAYLOAD,
        }
    }

    pub fn edns_payload(&self) -> Option<u16> {
        match self {
            Self::Udp { edns_payload } | Self::Stream { edns_payload } => *edns_payload,
        }
    }

    fn is_plain_udp(&self) -> bool {
        matches!(self, Self::Udp { edns_payload: None })
    }
}

/// A finished response plus its serialization policy.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsReply {
    pub message: Message,
    /// Whether names are compressed on the wire
    pub compress: bool,
}

impl DnsReply {
    /// Serialize, honouring the compression flag.
    pub fn to_wire(&self) -> ProtoResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(512);
        {
            let mut encoder = BinEncoder::new(&mut buf);
            encoder.set_canonical_names(!self.compress);
            self.message.emit(&mut encoder)?;
        }
        Ok(buf)
    }

    pub fn response_code(&self) -> ResponseCode {
        self.message.response_code()
    }
}

/// Answers DNS questions for the served domains.
pub struct DnsRouter {
    engine: ResolutionEngine,
    renderer: RecordRenderer,
    soa: SoaBuilder,
    udp_answer_limit: usize,
    compress: bool,
}

impl DnsRouter {
    pub fn new(engine: ResolutionEngine, config: &DnsConfig) -> Self {
        Self {
            engine,
            renderer: RecordRenderer::new(config.ttl_policy(), config.a_record_limit),
            soa: SoaBuilder::new(config.soa),
            udp_answer_limit: config.udp_answer_limit,
            compress: !config.disable_compression,
        }
    }

    /// Answer a decoded request message.
    ///
    /// Only the first question is answered; a message without one is a
    /// format error.
    pub async fn route_message(&self, request: &Message, stream: bool) -> DnsReply {
        let edns_payload = request.extensions().as_ref().map(Edns::max_payload);
        let transport = if stream {
            Transport::Stream { edns_payload }
        } else {
            Transport::Udp { edns_payload }
        };

        match request.queries().first() {
            Some(query) => self.route(request.header(), query, transport).await,
            None => {
                let mut message = self.response_skeleton(request.header(), None, transport);
                message.set_response_code(ResponseCode::FormErr);
                tracing::debug!("request {} carries no question", request.id());
                self.finish(message, transport)
            }
        }
    }

    /// Answer one question.
    pub async fn route(&self, header: &Header, query: &Query, transport: Transport) -> DnsReply {
        let mut message = self.response_skeleton(header, Some(query), transport);

        if header.op_code() != OpCode::Query {
            tracing::debug!("unsupported opcode {:?} for {}", header.op_code(), query.name());
            message.set_response_code(ResponseCode::NotImp);
            return self.finish(message, transport);
        }

        let qname = query.name().to_ascii();
        let zone = self
            .engine
            .parser()
            .zone_of(&qname)
            .unwrap_or_else(|| self.engine.parser().domain())
            .to_string();

        match self.answer(query).await {
            Ok(records) if !records.is_empty() => {
                tracing::debug!(
                    "answered {} {} with {} records",
                    qname,
                    query.query_type(),
                    records.answers.len()
                );
                message.set_response_code(ResponseCode::NoError);
                message.insert_answers(records.answers);
                message.insert_additionals(records.additionals);
            }
            Ok(_) => {
                tracing::debug!("no data for {} {}", qname, query.query_type());
                message.set_response_code(ResponseCode::NoError);
                self.add_soa(&mut message, &zone);
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::ResolutionLoop => tracing::warn!("{}: {}", qname, e),
                    ErrorKind::UpstreamFailure | ErrorKind::Timeout => {
                        tracing::error!("{}: {}", qname, e)
                    }
                    _ => tracing::debug!("{}: {}", qname, e),
                }
                if e.kind() == ErrorKind::NotAuthoritative {
                    message.set_authoritative(false);
                }
                message.set_response_code(e.response_code());
                if e.attaches_soa() {
                    self.add_soa(&mut message, &zone);
                }
            }
        }

        self.finish(message, transport)
    }

    async fn answer(&self, query: &Query) -> Result<RenderedRecords, ResolveError> {
        let parsed = self.engine.parser().parse(&query.name().to_ascii())?;
        let resolution = self
            .engine
            .resolve(parsed.lookup_type, parsed.payload)
            .await?;

        let req = RenderRequest {
            qname: query.name(),
            qtype: query.query_type(),
            lookup_type: parsed.lookup_type,
            payload: &resolution.payload,
            zone: &parsed.zone,
        };
        Ok(self.renderer.render(&req, &resolution.endpoints))
    }

    fn response_skeleton(&self, header: &Header, query: Option<&Query>, transport: Transport) -> Message {
        let mut message = Message::new();
        message
            .set_id(header.id())
            .set_message_type(MessageType::Response)
            .set_op_code(header.op_code())
            .set_authoritative(true)
            .set_recursion_desired(header.recursion_desired());
        if let Some(query) = query {
            message.add_query(query.clone());
        }
        if let Some(payload) = transport.edns_payload() {
            let mut edns = Edns::new();
            edns.set_max_payload(payload.max(MIN_UDP_PAYLOAD));
            message.set_edns(edns);
        }
        message
    }

    fn add_soa(&self, message: &mut Message, zone: &str) {
        match self.soa.build(zone) {
            Some(soa) => {
                message.add_name_server(soa);
            }
            None => tracing::warn!("cannot build SOA for zone {:?}", zone),
        }
    }

    fn finish(&self, mut message: Message, transport: Transport) -> DnsReply {
        if transport.is_plain_udp() && self.udp_answer_limit > 0 {
            limit_answers(&mut message, self.udp_answer_limit);
        }

        let mut reply = DnsReply {
            message,
            compress: self.compress,
        };
        truncate_to_budget(&mut reply, transport.size_budget());
        reply
    }
}

/// Keep at most `limit` answers and drop glue nothing refers to anymore.
///
/// A CNAME chain counts as one answer together with the record it leads to,
/// and is kept or dropped whole.
fn limit_answers(message: &mut Message, limit: usize) {
    if message.answers().len() <= limit {
        return;
    }
    let kept: Vec<Record> = answer_chains(message.take_answers())
        .into_iter()
        .take(limit)
        .flatten()
        .collect();
    message.insert_answers(kept);

    let referenced: Vec<_> = message
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            Some(RData::SRV(srv)) => Some(srv.target().clone()),
            Some(RData::CNAME(cname)) => Some(cname.0.clone()),
            _ => None,
        })
        .collect();
    message
        .additionals_mut()
        .retain(|r| referenced.contains(r.name()));
}

/// Split answers into runs where each CNAME is followed by the record for
/// its target.
fn answer_chains(answers: Vec<Record>) -> Vec<Vec<Record>> {
    let mut chains = Vec::new();
    let mut current = Vec::new();
    let mut records = answers.into_iter().peekable();
    while let Some(record) = records.next() {
        let continues = match record.data() {
            Some(RData::CNAME(cname)) => records.peek().is_some_and(|next| next.name() == &cname.0),
            _ => false,
        };
        current.push(record);
        if !continues {
            chains.push(std::mem::take(&mut current));
        }
    }
    chains
}

/// Drop additional records, then answers, until the reply fits. The question
/// and authority sections are never trimmed.
fn truncate_to_budget(reply: &mut DnsReply, budget: usize) {
    let mut truncated = false;
    loop {
        let size = match reply.to_wire() {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                tracing::error!("failed to encode response: {}", e);
                return;
            }
        };
        if size <= budget {
            break;
        }
        if reply.message.additionals_mut().pop().is_none()
            && reply.message.answers_mut().pop().is_none()
        {
            break;
        }
        truncated = true;
    }

    if truncated {
        tracing::debug!(
            "truncated response {} to {} bytes",
            reply.message.id(),
            budget
        );
        reply.message.set_truncated(true);
    }
}

/// Address records in a section, for callers inspecting replies.
pub fn address_records(records: &[Record]) -> impl Iterator<Item = &Record> {
    records
        .iter()
        .filter(|r| matches!(r.record_type(), RecordType::A | RecordType::AAAA))
}
