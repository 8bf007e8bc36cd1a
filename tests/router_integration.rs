//! Router Integration Tests
//!
//! Drive the public router API end to end against a scripted catalog:
//! question in, complete DNS message out.

use async_trait::async_trait;
use hickory_proto::op::{Header, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use parking_lot::Mutex;
use service_dns::{
    build_router, CatalogDataFetcher, CatalogResult, DnsConfig, DnsRouter, Endpoints, FetchContext,
    FetchError, Location, LookupType, QueryPayload, ResultType, Transport, ValidationError,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Scripted catalog
// ============================================================================

#[derive(Default)]
struct ScriptedFetcher {
    answers: HashMap<String, Result<Endpoints, FetchError>>,
    calls: Mutex<Vec<(QueryPayload, LookupType)>>,
}

impl ScriptedFetcher {
    fn answer(mut self, name: &str, endpoints: Result<Endpoints, FetchError>) -> Self {
        self.answers.insert(name.to_string(), endpoints);
        self
    }

    fn calls(&self) -> Vec<(QueryPayload, LookupType)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CatalogDataFetcher for ScriptedFetcher {
    fn validate_request(
        &self,
        _lookup_type: LookupType,
        _payload: &QueryPayload,
    ) -> Result<(), ValidationError> {
        Ok(())
    }

    fn normalize_request(&self, _payload: &mut QueryPayload) {}

    async fn fetch_endpoints(
        &self,
        _ctx: &FetchContext,
        payload: &QueryPayload,
        lookup_type: LookupType,
    ) -> Result<Endpoints, FetchError> {
        self.calls.lock().push((payload.clone(), lookup_type));
        self.answers
            .get(&payload.name)
            .cloned()
            .unwrap_or(Ok(Endpoints::NoData))
    }
}

fn router(fetcher: Arc<ScriptedFetcher>, config: DnsConfig) -> DnsRouter {
    build_router(&config, fetcher)
}

fn header(id: u16) -> Header {
    let mut header = Header::new();
    header
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    header
}

fn question(name: &str, qtype: RecordType) -> Query {
    Query::query(Name::from_str(name).unwrap(), qtype)
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32
}

const UDP: Transport = Transport::Udp { edns_payload: None };

// ============================================================================
// Source trace scenarios
// ============================================================================

#[tokio::test]
async fn test_no_data_answers_with_authoritative_soa() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let router = router(fetcher.clone(), DnsConfig::default());

    let before = now();
    let reply = router
        .route(&header(1), &question("foo.service.consul.", RecordType::A), UDP)
        .await;
    let after = now();

    let msg = &reply.message;
    assert!(msg.authoritative());
    assert!(reply.compress);
    assert_eq!(msg.response_code(), ResponseCode::NoError);
    assert_eq!(msg.op_code(), OpCode::Query);
    assert!(msg.answers().is_empty());
    assert!(msg.additionals().is_empty());
    assert_eq!(msg.queries(), &[question("foo.service.consul.", RecordType::A)]);

    assert_eq!(msg.name_servers().len(), 1);
    let soa_record = &msg.name_servers()[0];
    assert_eq!(soa_record.name().to_string(), "consul.");
    assert_eq!(soa_record.dns_class(), DNSClass::IN);
    assert_eq!(soa_record.ttl(), 4);

    let Some(RData::SOA(soa)) = soa_record.data() else {
        panic!("expected SOA in authority section");
    };
    assert_eq!(soa.mname().to_string(), "ns.consul.");
    assert_eq!(soa.rname().to_string(), "hostmaster.consul.");
    assert_eq!(soa.refresh(), 1);
    assert_eq!(soa.retry(), 2);
    assert_eq!(soa.expire(), 3);
    assert_eq!(soa.minimum(), 4);
    assert!(soa.serial() >= before && soa.serial() <= after);

    assert_eq!(
        fetcher.calls(),
        vec![(QueryPayload::new("foo"), LookupType::Service)]
    );
}

#[tokio::test]
async fn test_alias_srv_follows_virtual_result() {
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .answer(
                "alias",
                Ok(Endpoints::Found(vec![CatalogResult::new(ResultType::Virtual)
                    .with_service(Location::new("alias", "web.service.consul"))
                    .with_node(Location::new("web", "web.service.consul"))])),
            )
            .answer(
                "web",
                Ok(Endpoints::Found(vec![CatalogResult::new(ResultType::Node)
                    .with_service(Location::new("web", "webnode"))
                    .with_node(Location::new("webnode", "127.0.0.2"))])),
            ),
    );
    let config = DnsConfig {
        service_ttl: 123,
        ..Default::default()
    };
    let router = router(fetcher.clone(), config);

    let reply = router
        .route(&header(2), &question("alias.service.consul.", RecordType::SRV), UDP)
        .await;
    let msg = &reply.message;

    assert_eq!(msg.response_code(), ResponseCode::NoError);
    assert!(msg.authoritative());
    assert!(msg.name_servers().is_empty());

    assert_eq!(msg.answers().len(), 1);
    let srv_record = &msg.answers()[0];
    assert_eq!(srv_record.name().to_string(), "alias.service.consul.");
    assert_eq!(srv_record.ttl(), 123);
    let Some(RData::SRV(srv)) = srv_record.data() else {
        panic!("expected SRV answer");
    };
    assert_eq!(srv.priority(), 1);
    assert_eq!(srv.weight(), 0);
    assert_eq!(srv.port(), 0);
    assert_eq!(srv.target().to_string(), "web.service.consul.");

    assert_eq!(msg.additionals().len(), 1);
    let glue = &msg.additionals()[0];
    assert_eq!(glue.name().to_string(), "web.service.consul.");
    assert_eq!(glue.ttl(), 123);
    assert_eq!(glue.data(), Some(&RData::A(Ipv4Addr::new(127, 0, 0, 2).into())));

    assert_eq!(
        fetcher.calls(),
        vec![
            (QueryPayload::new("alias"), LookupType::Service),
            (QueryPayload::new("web"), LookupType::Service),
        ]
    );
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_alias_a_question_renders_cname_chain() {
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .answer(
                "alias",
                Ok(Endpoints::Found(vec![CatalogResult::new(ResultType::Virtual)
                    .with_service(Location::new("alias", "web.service.consul"))])),
            )
            .answer(
                "web",
                Ok(Endpoints::Found(vec![CatalogResult::new(ResultType::Node)
                    .with_node(Location::new("webnode", "127.0.0.2"))])),
            ),
    );
    let reply = router(fetcher, DnsConfig::default())
        .route(&header(3), &question("alias.service.consul.", RecordType::A), UDP)
        .await;

    let answers = reply.message.answers();
    assert_eq!(answers.len(), 2);
    assert_eq!(answers[0].name().to_string(), "alias.service.consul.");
    assert_eq!(answers[0].record_type(), RecordType::CNAME);
    assert_eq!(answers[1].name().to_string(), "web.service.consul.");
    assert_eq!(answers[1].record_type(), RecordType::A);
}

#[tokio::test]
async fn test_alias_cycle_fails_with_servfail() {
    let virtual_to = |target: &str| {
        Ok(Endpoints::Found(vec![CatalogResult::new(ResultType::Virtual)
            .with_service(Location::new("x", target))]))
    };
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .answer("a", virtual_to("b.service.consul"))
            .answer("b", virtual_to("a.service.consul")),
    );
    let reply = tokio::time::timeout(
        Duration::from_secs(1),
        router(fetcher.clone(), DnsConfig::default())
            .route(&header(4), &question("a.service.consul.", RecordType::A), UDP),
    )
    .await
    .expect("alias cycle must terminate");

    assert_eq!(reply.response_code(), ResponseCode::ServFail);
    assert!(reply.message.answers().is_empty());
    assert!(fetcher.calls().len() <= DnsConfig::default().max_alias_depth + 1);
}

#[tokio::test]
async fn test_identical_inputs_give_identical_bytes() {
    let fetcher = Arc::new(ScriptedFetcher::default().answer(
        "web",
        Ok(Endpoints::Found(vec![
            CatalogResult::new(ResultType::Node).with_node(Location::new("n1", "10.0.0.1")),
            CatalogResult::new(ResultType::Node).with_node(Location::new("n2", "10.0.0.2")),
        ])),
    ));
    let router = router(fetcher, DnsConfig::default());

    let first = router
        .route(&header(5), &question("web.service.consul.", RecordType::SRV), UDP)
        .await
        .to_wire()
        .unwrap();
    let second = router
        .route(&header(5), &question("web.service.consul.", RecordType::SRV), UDP)
        .await
        .to_wire()
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_no_data_replies_differ_only_in_serial() {
    let router = router(Arc::new(ScriptedFetcher::default()), DnsConfig::default());
    let q = question("foo.service.consul.", RecordType::A);

    let mut first = router.route(&header(6), &q, UDP).await.message;
    let mut second = router.route(&header(6), &q, UDP).await.message;

    let strip_serial = |records: Vec<hickory_proto::rr::Record>| -> Vec<(String, u32)> {
        records
            .into_iter()
            .map(|r| (r.name().to_string(), r.ttl()))
            .collect()
    };
    assert_eq!(
        strip_serial(first.take_name_servers()),
        strip_serial(second.take_name_servers())
    );
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_concurrent_questions_are_independent() {
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .answer(
                "web",
                Ok(Endpoints::Found(vec![CatalogResult::new(ResultType::Node)
                    .with_node(Location::new("n1", "10.0.0.1"))])),
            )
            .answer("db", Err(FetchError::Unavailable("rpc error".into()))),
    );
    let router = Arc::new(router(fetcher, DnsConfig::default()));

    let tasks = (0..32u16).map(|i| {
        let router = router.clone();
        async move {
            let name = if i % 2 == 0 { "web.service.consul." } else { "db.service.consul." };
            (i, router.route(&header(i), &question(name, RecordType::A), UDP).await)
        }
    });

    for (i, reply) in futures::future::join_all(tasks).await {
        assert_eq!(reply.message.id(), i);
        if i % 2 == 0 {
            assert_eq!(reply.response_code(), ResponseCode::NoError);
            assert_eq!(reply.message.answers().len(), 1);
        } else {
            assert_eq!(reply.response_code(), ResponseCode::ServFail);
        }
    }
}

#[tokio::test]
async fn test_slow_catalog_times_out_to_negative_answer() {
    struct StuckFetcher;

    #[async_trait]
    impl CatalogDataFetcher for StuckFetcher {
        fn validate_request(&self, _: LookupType, _: &QueryPayload) -> Result<(), ValidationError> {
            Ok(())
        }

        fn normalize_request(&self, _: &mut QueryPayload) {}

        async fn fetch_endpoints(
            &self,
            _: &FetchContext,
            _: &QueryPayload,
            _: LookupType,
        ) -> Result<Endpoints, FetchError> {
            std::future::pending().await
        }
    }

    let config = DnsConfig {
        request_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let router = build_router(&config, Arc::new(StuckFetcher));

    let reply = router
        .route(&header(7), &question("web.service.consul.", RecordType::A), UDP)
        .await;
    assert_eq!(reply.response_code(), ResponseCode::ServFail);
    assert_eq!(reply.message.name_servers().len(), 1);
}

#[tokio::test]
async fn test_record_type_mismatch_is_omitted_not_errored() {
    let fetcher = Arc::new(ScriptedFetcher::default().answer(
        "web",
        Ok(Endpoints::Found(vec![CatalogResult::new(ResultType::Node)
            .with_node(Location::new("n1", "10.0.0.1"))])),
    ));
    let reply = router(fetcher, DnsConfig::default())
        .route(&header(8), &question("web.service.consul.", RecordType::AAAA), UDP)
        .await;

    assert_eq!(reply.response_code(), ResponseCode::NoError);
    assert!(reply.message.answers().is_empty());
    assert_eq!(reply.message.name_servers().len(), 1);
}
