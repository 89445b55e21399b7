//! The gateway entry point shared by every AI-backed feature.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, CacheStore, MemoryCache};
use crate::config::Config;
use crate::error::{FailureKind, Result};
use crate::fingerprint::Fingerprint;
use crate::pipeline::{
    CacheStage, GatewayCall, ParseStage, Pipeline, QuotaGate, QuotaMeter, RetryStage,
};
use crate::quota::{QuotaManager, QuotaStore, QuotaUsage};
use crate::request::{ModelParams, Request, RequestBuilder};
use crate::response::{BatchResponse, Response};
use crate::retry::RetryPolicy;
use crate::stats::{GatewayStats, StatsSummary};
use crate::transport::{HttpTransport, Transport};

/// Quota-aware, caching client for the model provider.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct GatewayClient {
    pipeline: Pipeline,
    quota: Arc<dyn QuotaStore>,
    cache: Arc<dyn CacheStore>,
    stats: Arc<GatewayStats>,
    defaults: ModelParams,
    normalize_prompts: bool,
}

impl GatewayClient {
    /// Client with the HTTPS transport and in-memory stores.
    pub fn new(config: &Config) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: &Config) -> GatewayClientBuilder {
        GatewayClientBuilder {
            config: config.clone(),
            transport: None,
            quota: None,
            cache: None,
            retry: None,
        }
    }

    /// Start a request pre-filled with the configured model parameters.
    pub fn request(&self, prompt: impl Into<String>) -> RequestBuilder {
        Request::builder(prompt).model_params(self.defaults.clone())
    }

    pub fn defaults(&self) -> &ModelParams {
        &self.defaults
    }

    /// Run one logical call. Never fails: errors come back as a `Failure` response.
    pub async fn generate(&self, request: Request) -> Response {
        let call = GatewayCall {
            fingerprint: Fingerprint::of(&request, self.normalize_prompts),
            request,
            request_id: uuid::Uuid::new_v4().to_string(),
        };
        self.run(&call).await
    }

    /// Run a list call and split the result into one response per valid item.
    pub async fn generate_list(&self, request: Request) -> BatchResponse {
        let request = if request.is_list() {
            request
        } else {
            request.into_list()
        };
        BatchResponse::from_response(self.generate(request).await)
    }

    /// Drop every cached response whose fingerprint starts with `prefix`.
    ///
    /// Passing a namespace followed by `:` clears that business area.
    pub async fn invalidate(&self, prefix: &str) -> usize {
        let removed = self.cache.invalidate(prefix).await;
        info!(prefix, removed, "Cache invalidated");
        removed
    }

    /// Drop expired cache entries. Lookups expire entries lazily, so an
    /// unbounded cache needs this to shed keys that are never read again.
    pub async fn purge_expired_cache(&self) -> usize {
        let removed = self.cache.purge_expired().await;
        debug!(removed, "Expired cache entries purged");
        removed
    }

    pub async fn quota_usage(&self) -> Result<QuotaUsage> {
        self.quota.usage().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn stats(&self) -> StatsSummary {
        self.stats.summary()
    }

    #[instrument(
        name = "generate",
        skip_all,
        fields(request_id = %call.request_id, namespace = %call.request.namespace())
    )]
    async fn run(&self, call: &GatewayCall) -> Response {
        self.stats.record_call(call.request.namespace());
        debug!(fingerprint = %call.fingerprint, "AI call started");
        let start = Instant::now();

        let response = match self.pipeline.run(call).await {
            Ok(response) => {
                info!(
                    status = ?response.status,
                    skipped = response.skipped_count,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "AI call completed"
                );
                response
            }
            Err(error) => {
                match error.kind() {
                    FailureKind::QuotaDenied => info!(error = %error, "AI call denied"),
                    kind => warn!(
                        error = %error,
                        kind = ?kind,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "AI call failed"
                    ),
                }
                Response::failure(error)
            }
        };

        self.stats.record_outcome(&response);
        response
    }
}

/// Builder that lets tests and alternative deployments swap the provider or stores.
pub struct GatewayClientBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    quota: Option<Arc<dyn QuotaStore>>,
    cache: Option<Arc<dyn CacheStore>>,
    retry: Option<RetryPolicy>,
}

impl GatewayClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn quota_store(mut self, quota: Arc<dyn QuotaStore>) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn build(self) -> GatewayClient {
        let config = self.config;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new(&config.provider)));
        let quota = self
            .quota
            .unwrap_or_else(|| Arc::new(QuotaManager::from_config(&config.quota)));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::from_config(&config.cache)));
        let retry = self
            .retry
            .unwrap_or_else(|| RetryPolicy::from_config(&config.provider));
        let stats = Arc::new(GatewayStats::new());

        let pipeline = Pipeline::new(transport)
            .stage(QuotaGate::new(quota.clone()))
            .stage(CacheStage::new(
                cache.clone(),
                Duration::from_secs(config.cache.ttl_seconds),
                stats.clone(),
            ))
            .stage(ParseStage::new(config.logging.log_requests))
            .stage(QuotaMeter::new(quota.clone()))
            .stage(RetryStage::new(retry, stats.clone()));

        debug!(stages = ?pipeline.stage_names(), "Gateway pipeline assembled");

        GatewayClient {
            pipeline,
            quota,
            cache,
            stats,
            defaults: ModelParams::from_config(&config.model),
            normalize_prompts: config.cache.normalize_prompts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GatewayError, QuotaWindow, TransportError};
    use crate::response::ResponseStatus;
    use crate::schema::Schema;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Reply = std::result::Result<String, TransportError>;

    /// Plays back scripted replies, then repeats `fallback` forever.
    struct MockTransport {
        script: Mutex<VecDeque<Reply>>,
        fallback: Reply,
        delay: Duration,
        calls: AtomicU32,
    }

    impl MockTransport {
        fn scripted(script: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback: Err(TransportError::Network("script exhausted".into())),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn always(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Ok(reply.to_string()),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn complete(&self, _request: &Request) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn config(hourly: u32, daily: u32) -> Config {
        let mut config = Config::default();
        config.quota.hourly = hourly;
        config.quota.daily = daily;
        config.provider.max_retries = 3;
        config.provider.base_backoff_ms = 100;
        config.provider.backoff_jitter = 0.0;
        config.cache.ttl_seconds = 60;
        config
    }

    fn client(config: &Config, transport: Arc<MockTransport>) -> GatewayClient {
        GatewayClient::builder(config).transport(transport).build()
    }

    fn server_error() -> Reply {
        Err(TransportError::ServerError {
            status: 503,
            message: "overloaded".into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_avoids_double_billing() {
        let transport = MockTransport::always("Try a leek gratin.");
        let gateway = client(&config(10, 100), transport.clone());

        let first = gateway.generate(gateway.request("Dinner idea?").build()).await;
        let second = gateway.generate(gateway.request("Dinner idea?").build()).await;

        assert_eq!(first, second);
        assert_eq!(first.status, ResponseStatus::Success);
        assert_eq!(transport.calls(), 1);

        let usage = gateway.quota_usage().await.unwrap();
        assert_eq!(usage.hourly_used, 1);
        assert_eq!(usage.daily_used, 1);
        assert_eq!(gateway.cache_stats().await.hits, 1);
        assert_eq!(gateway.stats().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_consume_one_unit() {
        let transport =
            MockTransport::scripted(vec![server_error(), server_error(), server_error()]);
        let gateway = client(&config(10, 100), transport.clone());

        let response = gateway.generate(gateway.request("Budget tips").build()).await;

        assert_eq!(response.status, ResponseStatus::Failure);
        assert!(matches!(
            response.error,
            Some(GatewayError::Transport(TransportError::ServerError { status: 503, .. }))
        ));
        assert_eq!(transport.calls(), 3);
        assert_eq!(gateway.quota_usage().await.unwrap().hourly_used, 1);
        assert_eq!(gateway.stats().provider_attempts, 3);
        assert_eq!(gateway.stats().provider_unavailable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let transport = MockTransport::scripted(vec![
            Err(TransportError::RateLimited { retry_after: None }),
            Ok("ok".into()),
        ]);
        let gateway = client(&config(10, 100), transport.clone());

        let response = gateway.generate(gateway.request("hello").build()).await;
        assert!(response.is_success());
        assert_eq!(response.raw_text, "ok");
        assert_eq!(transport.calls(), 2);
        assert_eq!(gateway.quota_usage().await.unwrap().hourly_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_denial_makes_no_network_call() {
        let transport = MockTransport::always("answer");
        let gateway = client(&config(1, 100), transport.clone());

        assert!(
            gateway
                .generate(gateway.request("first").build())
                .await
                .is_success()
        );
        let denied = gateway.generate(gateway.request("second").build()).await;

        assert_eq!(denied.status, ResponseStatus::Failure);
        match denied.error {
            Some(GatewayError::QuotaExceeded {
                window,
                retry_after,
            }) => {
                assert_eq!(window, QuotaWindow::Hourly);
                assert!(retry_after <= Duration::from_secs(3600));
            }
            other => panic!("expected quota error, got {other:?}"),
        }
        assert_eq!(transport.calls(), 1);
        assert_eq!(gateway.quota_usage().await.unwrap().hourly_used, 1);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(
            gateway
                .generate(gateway.request("second").build())
                .await
                .is_success()
        );
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_quota_denial() {
        let transport = MockTransport::always("answer");
        let gateway = client(&config(10, 2), transport.clone());

        for prompt in ["a", "b"] {
            assert!(gateway.generate(gateway.request(prompt).build()).await.is_success());
        }
        let denied = gateway.generate(gateway.request("c").build()).await;
        assert!(matches!(
            denied.error,
            Some(GatewayError::QuotaExceeded {
                window: QuotaWindow::Daily,
                ..
            })
        ));
        assert_eq!(gateway.stats().quota_denied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let transport = MockTransport::scripted(vec![Err(TransportError::Rejected {
            status: 422,
            message: "unknown model".into(),
        })]);
        let gateway = client(&config(10, 100), transport.clone());

        let response = gateway.generate(gateway.request("hello").build()).await;

        assert!(matches!(
            response.error,
            Some(GatewayError::Rejected { status: 422, .. })
        ));
        assert_eq!(transport.calls(), 1);
        assert_eq!(gateway.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_violation_is_not_cached() {
        let transport = MockTransport::scripted(vec![
            Ok("I'd rather not answer in JSON.".into()),
            Ok("```json\n{\"nom\": \"Tarte\"}\n```".into()),
        ]);
        let gateway = client(&config(10, 100), transport.clone());
        let schema = Schema::object("recipe", &["nom"]).unwrap();

        let failed = gateway
            .generate(gateway.request("A recipe").schema(schema.clone()).build())
            .await;
        assert_eq!(failed.status, ResponseStatus::Failure);
        assert_eq!(failed.raw_text, "I'd rather not answer in JSON.");
        assert_eq!(gateway.cache_stats().await.entries, 0);

        let parsed = gateway
            .generate(gateway.request("A recipe").schema(schema).build())
            .await;
        assert_eq!(parsed.status, ResponseStatus::Success);
        assert_eq!(parsed.parsed_value.unwrap()["nom"], "Tarte");
        assert_eq!(transport.calls(), 2);
        assert_eq!(gateway.quota_usage().await.unwrap().hourly_used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires() {
        let transport = MockTransport::always("answer");
        let gateway = client(&config(10, 100), transport.clone());
        let request = gateway.request("hello").build();

        gateway.generate(request.clone()).await;
        tokio::time::advance(Duration::from_secs(59)).await;
        gateway.generate(request.clone()).await;
        assert_eq!(transport.calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        gateway.generate(request).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_namespace() {
        let transport = MockTransport::always("answer");
        let gateway = client(&config(10, 100), transport.clone());
        let recipes = gateway.request("hello").namespace("recipes").build();
        let budget = gateway.request("hello").namespace("budget").build();

        gateway.generate(recipes.clone()).await;
        gateway.generate(budget.clone()).await;
        assert_eq!(transport.calls(), 2);

        assert_eq!(gateway.invalidate("recipes:").await, 1);
        gateway.generate(recipes).await;
        gateway.generate(budget).await;
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_cache() {
        let mut config = config(10, 100);
        config.cache.max_entries = 0;
        let gateway = client(&config, MockTransport::always("answer"));

        gateway.generate(gateway.request("a").build()).await;
        gateway.generate(gateway.request("b").build()).await;
        assert_eq!(gateway.purge_expired_cache().await, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(gateway.purge_expired_cache().await, 2);
        assert_eq!(gateway.cache_stats().await.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delimiter_lookalikes_are_not_served_from_cache() {
        let transport = MockTransport::scripted(vec![Ok("first".into()), Ok("second".into())]);
        let gateway = client(&config(10, 100), transport.clone());

        let a = gateway
            .generate(gateway.request("Compare A | B").system("C").build())
            .await;
        let b = gateway
            .generate(gateway.request("Compare A ").system(" B|C").build())
            .await;

        assert_eq!(a.raw_text, "first");
        assert_eq!(b.raw_text, "second");
        assert_eq!(transport.calls(), 2);
    }

    /// Fails every call whose prompt is "flaky", answers the rest.
    struct PromptAware {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for PromptAware {
        async fn complete(&self, request: &Request) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.prompt() == "flaky" {
                server_error()
            } else {
                Ok(format!("answer to {}", request.prompt()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_does_not_block_other_calls() {
        let mut config = config(10, 100);
        config.provider.base_backoff_ms = 10_000;
        let transport = Arc::new(PromptAware {
            calls: AtomicU32::new(0),
        });
        let gateway = Arc::new(
            GatewayClient::builder(&config)
                .transport(transport.clone())
                .build(),
        );

        let flaky = gateway.request("flaky").build();
        let background = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.generate(flaky).await }
        });

        // Let the flaky call fail once and enter its backoff sleep.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let start = tokio::time::Instant::now();
        let steady = gateway.generate(gateway.request("steady").build()).await;
        assert!(steady.is_success());
        assert_eq!(steady.raw_text, "answer to steady");
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(!background.is_finished());

        let failed = background.await.unwrap();
        assert_eq!(failed.status, ResponseStatus::Failure);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_api_key_fails_without_retrying() {
        let mut config = config(10, 100);
        config.provider.api_key = Some("sk-bad\nkey".into());
        let gateway = GatewayClient::new(&config);

        let start = tokio::time::Instant::now();
        let response = gateway.generate(gateway.request("hello").build()).await;

        assert!(
            matches!(response.error, Some(GatewayError::Rejected { status: 0, .. })),
            "{:?}",
            response.error
        );
        assert_eq!(gateway.stats().provider_attempts, 1);
        assert_eq!(gateway.stats().rejected, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[derive(Debug, Deserialize)]
    struct Recipe {
        nom: String,
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_list_partial_success() {
        let transport = MockTransport::always(
            "Voici :\n```json\n[{\"nom\": \"Tarte\"}, {\"temps\": 20}, {\"nom\": \"Soupe\"}]\n```",
        );
        let gateway = client(&config(10, 100), transport.clone());
        let schema = Schema::object("recipe", &["nom"]).unwrap();

        let batch = gateway
            .generate_list(gateway.request("Three recipes").schema(schema).build())
            .await;

        assert_eq!(batch.status, ResponseStatus::PartialSuccess);
        assert_eq!(batch.skipped_count, 1);
        assert_eq!(batch.items.len(), 2);
        let recipes: Vec<Recipe> = batch.items_as().unwrap();
        assert_eq!(recipes[0].nom, "Tarte");
        assert_eq!(recipes[1].nom, "Soupe");
        assert_eq!(gateway.stats().partial_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_uses_configured_defaults() {
        let mut config = config(10, 100);
        config.model.name = "open-mistral-nemo".into();
        config.model.temperature = 0.2;
        let gateway = client(&config, MockTransport::always("x"));

        let request = gateway.request("hi").max_tokens(50).build();
        assert_eq!(request.model_params().model_name, "open-mistral-nemo");
        assert_eq!(request.model_params().temperature, 0.2);
        assert_eq!(request.model_params().max_tokens, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_never_over_admit() {
        const QUOTA: u32 = 5;
        const EXTRA: u32 = 7;

        let transport = Arc::new(MockTransport {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok("answer".into()),
            delay: Duration::from_millis(20),
            calls: AtomicU32::new(0),
        });
        let gateway = Arc::new(client(&config(QUOTA, 100), transport.clone()));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..QUOTA + EXTRA {
            let gateway = gateway.clone();
            tasks.spawn(async move {
                let request = gateway.request(format!("prompt {i}")).build();
                gateway.generate(request).await
            });
        }

        let mut allowed = 0;
        let mut denied = 0;
        while let Some(result) = tasks.join_next().await {
            let response = result.unwrap();
            match response.error {
                None => allowed += 1,
                Some(GatewayError::QuotaExceeded { .. }) => denied += 1,
                Some(other) => panic!("unexpected error {other}"),
            }
        }

        assert_eq!(allowed, QUOTA);
        assert_eq!(denied, EXTRA);
        assert_eq!(transport.calls(), QUOTA);
        assert_eq!(gateway.quota_usage().await.unwrap().hourly_used, QUOTA);
    }
}
