//! Resolution Engine - catalog lookups with alias expansion
//!
//! Turns a parsed question into a flat list of terminal endpoints. Virtual
//! results are followed hop by hop through the fetcher until every branch
//! reaches a node or service entry.

use crate::domain::entities::{CatalogResult, Endpoints, Location, QueryPayload, ResolvedEndpoint};
use crate::domain::errors::{FetchError, ResolveError};
use crate::domain::ports::{CatalogDataFetcher, FetchContext};
use crate::domain::services::QueryParser;
use crate::domain::value_objects::{LookupType, ResultType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Terminal endpoints for one question, plus the normalized top-level payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub payload: QueryPayload,
    pub endpoints: Vec<ResolvedEndpoint>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// One pending lookup on the work stack.
struct Hop {
    payload: QueryPayload,
    lookup_type: LookupType,
    /// Alias names followed to reach this hop
    aliases: Vec<String>,
    /// Payloads already fetched on this branch
    path: Vec<QueryPayload>,
}

enum Step {
    Fetch(Hop),
    Emit(ResolvedEndpoint),
}

/// Resolves questions against a catalog fetcher.
///
/// Stateless between calls; one instance serves any number of concurrent
/// questions.
pub struct ResolutionEngine {
    fetcher: Arc<dyn CatalogDataFetcher>,
    parser: QueryParser,
    max_depth: usize,
    request_timeout: Duration,
}

impl ResolutionEngine {
    pub fn new(
        fetcher: Arc<dyn CatalogDataFetcher>,
        parser: QueryParser,
        max_depth: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            parser,
            max_depth,
            request_timeout,
        }
    }

    pub fn parser(&self) -> &QueryParser {
        &self.parser
    }

    /// Resolve a payload to its terminal endpoints.
    ///
    /// An empty [`Resolution`] is the no-data outcome. The whole expansion,
    /// alias hops included, is bounded by the request timeout.
    pub async fn resolve(
        &self,
        lookup_type: LookupType,
        payload: QueryPayload,
    ) -> Result<Resolution, ResolveError> {
        let deadline = Instant::now() + self.request_timeout;
        let ctx = FetchContext::new(deadline);

        match tokio::time::timeout_at(deadline, self.resolve_within(&ctx, lookup_type, payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(self.request_timeout)),
        }
    }

    async fn resolve_within(
        &self,
        ctx: &FetchContext,
        lookup_type: LookupType,
        mut payload: QueryPayload,
    ) -> Result<Resolution, ResolveError> {
        self.fetcher.validate_request(lookup_type, &payload)?;
        self.fetcher.normalize_request(&mut payload);

        let top = payload.clone();
        let results = match self.fetch(ctx, &payload, lookup_type).await {
            Ok(Endpoints::Found(results)) => results,
            Ok(Endpoints::NoData) => {
                tracing::debug!("no data for {} lookup of {:?}", lookup_type, payload.name);
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let root = Hop {
            path: vec![payload.clone()],
            payload,
            lookup_type,
            aliases: Vec::new(),
        };

        // Depth-first, pushed in reverse so output keeps fetch order.
        let mut stack: Vec<Step> = Vec::new();
        self.push_results(&root, results, &mut stack)?;

        // Alias targets shared by several branches are fetched once.
        let mut fetched: HashMap<(LookupType, QueryPayload), Endpoints> = HashMap::new();
        let mut endpoints = Vec::new();
        while let Some(step) = stack.pop() {
            match step {
                Step::Emit(endpoint) => endpoints.push(endpoint),
                Step::Fetch(mut hop) => {
                    self.fetcher.normalize_request(&mut hop.payload);
                    if hop.path.contains(&hop.payload) {
                        return Err(self.loop_error(&hop));
                    }
                    hop.path.push(hop.payload.clone());

                    let key = (hop.lookup_type, hop.payload.clone());
                    let hop_endpoints = match fetched.get(&key) {
                        Some(known) => known.clone(),
                        None => {
                            let outcome = match self.fetch(ctx, &hop.payload, hop.lookup_type).await {
                                Ok(endpoints) => endpoints,
                                Err(FetchError::NotFound(_)) => Endpoints::NoData,
                                Err(e) => return Err(e.into()),
                            };
                            fetched.insert(key, outcome.clone());
                            outcome
                        }
                    };
                    let Endpoints::Found(results) = hop_endpoints else {
                        tracing::debug!("alias target {:?} resolved to nothing", hop.aliases.last());
                        continue;
                    };
                    self.push_results(&hop, results, &mut stack)?;
                }
            }
        }

        Ok(Resolution {
            payload: top,
            endpoints,
        })
    }

    /// One catalog read. `addr` names carry their own address and never
    /// reach the fetcher.
    async fn fetch(
        &self,
        ctx: &FetchContext,
        payload: &QueryPayload,
        lookup_type: LookupType,
    ) -> Result<Endpoints, FetchError> {
        if lookup_type == LookupType::Addr {
            return Endpoints::for_addr(&payload.name)
                .ok_or_else(|| FetchError::NotFound(payload.name.clone()));
        }
        self.fetcher.fetch_endpoints(ctx, payload, lookup_type).await
    }

    fn push_results(
        &self,
        hop: &Hop,
        results: Vec<CatalogResult>,
        stack: &mut Vec<Step>,
    ) -> Result<(), ResolveError> {
        let mut steps = Vec::with_capacity(results.len());
        for result in results {
            if !result.is_virtual() {
                steps.push(Step::Emit(ResolvedEndpoint {
                    result,
                    aliases: hop.aliases.clone(),
                }));
                continue;
            }

            let Some(target) = alias_target(&result) else {
                tracing::warn!("virtual result without a target in {:?}", hop.payload.name);
                continue;
            };

            if hop.aliases.len() >= self.max_depth {
                return Err(self.loop_error(hop));
            }

            match self.parser.parse(&target) {
                Ok(parsed) => {
                    let mut aliases = hop.aliases.clone();
                    aliases.push(target);
                    steps.push(Step::Fetch(Hop {
                        payload: parsed.payload,
                        lookup_type: hop.lookup_type,
                        aliases,
                        path: hop.path.clone(),
                    }));
                }
                Err(ResolveError::NotAuthoritative(_)) => {
                    // Outside our domains: the hostname itself is the answer.
                    let service = Location::new(hop.payload.name.clone(), target);
                    steps.push(Step::Emit(ResolvedEndpoint {
                        result: CatalogResult {
                            result_type: ResultType::Service,
                            service: Some(service),
                            node: None,
                            weight: result.weight,
                            ttl: result.ttl,
                        },
                        aliases: hop.aliases.clone(),
                    }));
                }
                Err(e) => {
                    tracing::warn!("skipping unresolvable alias target: {}", e);
                }
            }
        }

        stack.extend(steps.into_iter().rev());
        Ok(())
    }

    fn loop_error(&self, hop: &Hop) -> ResolveError {
        let name = hop
            .aliases
            .last()
            .cloned()
            .unwrap_or_else(|| hop.payload.name.clone());
        tracing::warn!(
            "alias loop detected at {} after {} hops: {:?}",
            name,
            hop.aliases.len(),
            hop.aliases
        );
        ResolveError::ResolutionLoop {
            name,
            depth: hop.aliases.len(),
        }
    }
}

/// The name a virtual result points at.
fn alias_target(result: &CatalogResult) -> Option<String> {
    result
        .service
        .as_ref()
        .map(|s| s.address.as_str())
        .filter(|a| !a.is_empty())
        .or_else(|| {
            result
                .node
                .as_ref()
                .map(|n| n.address.as_str())
                .filter(|a| !a.is_empty())
        })
        .map(|a| a.trim_end_matches('.').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ErrorKind, ValidationError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    // ===== Mock Implementations =====

    #[derive(Default)]
    struct MockFetcher {
        answers: HashMap<String, Result<Endpoints, FetchError>>,
        calls: Mutex<Vec<(String, LookupType)>>,
        reject: Option<ValidationError>,
        delay: Option<Duration>,
        normalized: AtomicUsize,
    }

    impl MockFetcher {
        fn with(mut self, name: &str, answer: Result<Endpoints, FetchError>) -> Self {
            self.answers.insert(name.to_string(), answer);
            self
        }

        fn calls(&self) -> Vec<(String, LookupType)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CatalogDataFetcher for MockFetcher {
        fn validate_request(
            &self,
            _lookup_type: LookupType,
            _payload: &QueryPayload,
        ) -> Result<(), ValidationError> {
            match &self.reject {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        fn normalize_request(&self, _payload: &mut QueryPayload) {
            self.normalized.fetch_add(1, Ordering::SeqCst);
        }

        async fn fetch_endpoints(
            &self,
            _ctx: &FetchContext,
            payload: &QueryPayload,
            lookup_type: LookupType,
        ) -> Result<Endpoints, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push((payload.name.clone(), lookup_type));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.answers
                .get(&payload.name)
                .cloned()
                .unwrap_or(Ok(Endpoints::NoData))
        }
    }

    fn engine(fetcher: MockFetcher) -> (ResolutionEngine, Arc<MockFetcher>) {
        let fetcher = Arc::new(fetcher);
        let engine = ResolutionEngine::new(
            fetcher.clone(),
            QueryParser::new("consul", None),
            10,
            Duration::from_secs(2),
        );
        (engine, fetcher)
    }

    fn node(name: &str, address: &str) -> CatalogResult {
        CatalogResult::new(ResultType::Node)
            .with_service(Location::new(name, ""))
            .with_node(Location::new(name, address))
    }

    fn alias(name: &str, target: &str) -> CatalogResult {
        CatalogResult::new(ResultType::Virtual)
            .with_service(Location::new(name, target))
            .with_node(Location::new(name, target))
    }

    fn found(results: Vec<CatalogResult>) -> Result<Endpoints, FetchError> {
        Ok(Endpoints::Found(results))
    }

    #[tokio::test]
    async fn test_resolve_direct_results() {
        let (engine, fetcher) = engine(
            MockFetcher::default().with("web", found(vec![node("n1", "10.0.0.1"), node("n2", "10.0.0.2")])),
        );

        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("web"))
            .await
            .unwrap();

        assert_eq!(res.endpoints.len(), 2);
        assert!(res.endpoints.iter().all(|e| e.aliases.is_empty()));
        assert_eq!(fetcher.calls(), vec![("web".to_string(), LookupType::Service)]);
    }

    #[tokio::test]
    async fn test_resolve_no_data_is_empty() {
        let (engine, _) = engine(MockFetcher::default());
        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("foo"))
            .await
            .unwrap();
        assert!(res.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let (engine, _) = engine(
            MockFetcher::default().with("ghost", Err(FetchError::NotFound("ghost".into()))),
        );
        let err = engine
            .resolve(LookupType::Service, QueryPayload::new("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameNotFound);
    }

    #[tokio::test]
    async fn test_resolve_upstream_failure() {
        let (engine, _) = engine(
            MockFetcher::default().with("web", Err(FetchError::Unavailable("catalog down".into()))),
        );
        let err = engine
            .resolve(LookupType::Service, QueryPayload::new("web"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    }

    #[tokio::test]
    async fn test_resolve_validation_rejects_before_fetch() {
        let (engine, fetcher) = engine(MockFetcher {
            reject: Some(ValidationError::PeerWithDatacenter),
            ..Default::default()
        });
        let err = engine
            .resolve(LookupType::Service, QueryPayload::new("web"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_follows_alias() {
        let (engine, fetcher) = engine(
            MockFetcher::default()
                .with("alias", found(vec![alias("alias", "web.service.consul")]))
                .with("web", found(vec![node("webnode", "127.0.0.2")])),
        );

        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("alias"))
            .await
            .unwrap();

        assert_eq!(res.payload.name, "alias");
        assert_eq!(res.endpoints.len(), 1);
        assert_eq!(res.endpoints[0].aliases, vec!["web.service.consul".to_string()]);
        assert_eq!(res.endpoints[0].result.result_type, ResultType::Node);
        assert_eq!(
            fetcher.calls(),
            vec![
                ("alias".to_string(), LookupType::Service),
                ("web".to_string(), LookupType::Service),
            ]
        );
        assert_eq!(fetcher.normalized.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_preserves_order_across_aliases() {
        let (engine, _) = engine(
            MockFetcher::default()
                .with(
                    "mix",
                    found(vec![
                        node("first", "10.0.0.1"),
                        alias("mix", "web.service.consul"),
                        node("last", "10.0.0.9"),
                    ]),
                )
                .with("web", found(vec![node("w1", "10.0.0.5"), node("w2", "10.0.0.6")])),
        );

        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("mix"))
            .await
            .unwrap();

        let names: Vec<_> = res
            .endpoints
            .iter()
            .map(|e| e.result.node.as_ref().unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "w1", "w2", "last"]);
    }

    #[tokio::test]
    async fn test_resolve_chained_aliases() {
        let (engine, _) = engine(
            MockFetcher::default()
                .with("a", found(vec![alias("a", "b.service.consul")]))
                .with("b", found(vec![alias("b", "c.service.consul.")]))
                .with("c", found(vec![node("cn", "10.1.1.1")])),
        );

        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("a"))
            .await
            .unwrap();

        assert_eq!(res.endpoints.len(), 1);
        assert_eq!(
            res.endpoints[0].aliases,
            vec!["b.service.consul".to_string(), "c.service.consul".to_string()]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_resolve_alias_cycle_is_loop() {
        let (engine, _) = engine(
            MockFetcher::default()
                .with("a", found(vec![alias("a", "b.service.consul")]))
                .with("b", found(vec![alias("b", "a.service.consul")])),
        );

        let err = engine
            .resolve(LookupType::Service, QueryPayload::new("a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResolutionLoop);
        assert!(logs_contain("alias loop detected"));
    }

    #[tokio::test]
    async fn test_resolve_depth_bound() {
        let mut fetcher = MockFetcher::default();
        for i in 0..20 {
            fetcher = fetcher.with(
                &format!("s{}", i),
                found(vec![alias("x", &format!("s{}.service.consul", i + 1))]),
            );
        }
        let fetcher = Arc::new(fetcher);
        let engine = ResolutionEngine::new(
            fetcher.clone(),
            QueryParser::new("consul", None),
            3,
            Duration::from_secs(2),
        );

        let err = engine
            .resolve(LookupType::Service, QueryPayload::new("s0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ResolutionLoop { depth: 3, .. }));
        assert_eq!(fetcher.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_resolve_diamond_is_not_a_loop() {
        let (engine, fetcher) = engine(
            MockFetcher::default()
                .with(
                    "front",
                    found(vec![
                        alias("front", "web.service.consul"),
                        alias("front", "web.service.consul"),
                    ]),
                )
                .with("web", found(vec![node("w1", "10.0.0.5")])),
        );

        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("front"))
            .await
            .unwrap();
        assert_eq!(res.endpoints.len(), 2);
        assert_eq!(fetcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_fan_out_fetches_shared_target_once() {
        let (engine, fetcher) = engine(
            MockFetcher::default()
                .with(
                    "front",
                    found(vec![alias("left", "mid-a.service.consul"), alias("right", "mid-b.service.consul")]),
                )
                .with("mid-a", found(vec![alias("mid-a", "web.service.consul")]))
                .with("mid-b", found(vec![alias("mid-b", "web.service.consul")]))
                .with("web", found(vec![node("w1", "10.0.0.5"), node("w2", "10.0.0.6")])),
        );

        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("front"))
            .await
            .unwrap();
        assert_eq!(res.endpoints.len(), 4);
        assert_eq!(
            res.endpoints[2].aliases,
            vec!["mid-b.service.consul".to_string(), "web.service.consul".to_string()]
        );

        let web_calls = fetcher.calls().iter().filter(|(name, _)| name == "web").count();
        assert_eq!(web_calls, 1);
        assert_eq!(fetcher.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_resolve_addr_needs_no_catalog() {
        let (engine, fetcher) = engine(MockFetcher::default());

        let res = engine
            .resolve(LookupType::Addr, QueryPayload::new("0a010002"))
            .await
            .unwrap();
        assert_eq!(res.endpoints.len(), 1);
        assert_eq!(res.endpoints[0].result.node.as_ref().unwrap().address, "10.1.0.2");
        assert!(fetcher.calls().is_empty());

        let err = engine
            .resolve(LookupType::Addr, QueryPayload::new("nothex"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameNotFound);
    }

    #[tokio::test]
    async fn test_resolve_external_alias_is_terminal() {
        let (engine, fetcher) = engine(
            MockFetcher::default().with("ext", found(vec![alias("ext", "api.example.com.").with_ttl(60)])),
        );

        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("ext"))
            .await
            .unwrap();

        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(res.endpoints.len(), 1);
        let result = &res.endpoints[0].result;
        assert_eq!(result.result_type, ResultType::Service);
        assert_eq!(result.service.as_ref().unwrap().address, "api.example.com");
        assert_eq!(result.ttl, Some(60));
        assert!(res.endpoints[0].aliases.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_dangling_alias_is_dropped() {
        let (engine, _) = engine(
            MockFetcher::default()
                .with("a", found(vec![alias("a", "gone.service.consul"), node("n", "10.0.0.1")]))
                .with("gone", Err(FetchError::NotFound("gone".into()))),
        );

        let res = engine
            .resolve(LookupType::Service, QueryPayload::new("a"))
            .await
            .unwrap();
        assert_eq!(res.endpoints.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_alias_upstream_failure_propagates() {
        let (engine, _) = engine(
            MockFetcher::default()
                .with("a", found(vec![alias("a", "b.service.consul")]))
                .with("b", Err(FetchError::Unavailable("timeout talking to server".into()))),
        );

        let err = engine
            .resolve(LookupType::Service, QueryPayload::new("a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    }

    #[tokio::test]
    async fn test_resolve_timeout() {
        let fetcher = Arc::new(MockFetcher {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let engine = ResolutionEngine::new(
            fetcher,
            QueryParser::new("consul", None),
            10,
            Duration::from_millis(20),
        );

        let err = engine
            .resolve(LookupType::Service, QueryPayload::new("slow"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_alias_target_prefers_service_address() {
        let result = CatalogResult::new(ResultType::Virtual)
            .with_service(Location::new("a", "web.service.consul."))
            .with_node(Location::new("a", "other.service.consul"));
        assert_eq!(alias_target(&result).as_deref(), Some("web.service.consul"));

        let result = CatalogResult::new(ResultType::Virtual)
            .with_node(Location::new("a", "other.service.consul"));
        assert_eq!(alias_target(&result).as_deref(), Some("other.service.consul"));

        assert_eq!(alias_target(&CatalogResult::new(ResultType::Virtual)), None);
    }
}
