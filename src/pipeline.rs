//! Gateway call pipeline.
//!
//! Each cross-cutting concern is a [`Stage`] that may short-circuit or hand the
//! call to the rest of the chain through [`Next`]. The last link is always the
//! [`Transport`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::parser::OutputParser;
use crate::quota::QuotaStore;
use crate::request::Request;
use crate::response::{Response, ResponseStatus};
use crate::retry::RetryPolicy;
use crate::stats::GatewayStats;
use crate::transport::Transport;

/// One logical call travelling through the pipeline.
#[derive(Debug, Clone)]
pub struct GatewayCall {
    pub request: Request,
    pub fingerprint: Fingerprint,
    pub request_id: String,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn call(&self, call: &GatewayCall, next: Next<'_>) -> Result<Response>;
}

/// The remainder of the pipeline after the current stage.
///
/// `Next` is `Copy`, so a stage may run the rest of the chain more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Box<dyn Stage>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub async fn run(self, call: &GatewayCall) -> Result<Response> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    transport: self.transport,
                };
                stage.call(call, next).await
            }
            None => {
                let text = self.transport.complete(&call.request).await?;
                Ok(Response::raw(text))
            }
        }
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            stages: Vec::new(),
            transport,
        }
    }

    /// Append a stage; stages run in insertion order.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, call: &GatewayCall) -> Result<Response> {
        Next {
            stages: &self.stages,
            transport: self.transport.as_ref(),
        }
        .run(call)
        .await
    }
}

/// Rejects the call up front when either quota window is exhausted.
pub struct QuotaGate {
    quota: Arc<dyn QuotaStore>,
}

impl QuotaGate {
    pub fn new(quota: Arc<dyn QuotaStore>) -> Self {
        Self { quota }
    }
}

#[async_trait]
impl Stage for QuotaGate {
    fn name(&self) -> &'static str {
        "quota_gate"
    }

    async fn call(&self, call: &GatewayCall, next: Next<'_>) -> Result<Response> {
        self.quota.can_proceed().await?.into_result()?;
        next.run(call).await
    }
}

/// Serves repeated requests from the cache and stores fresh successes.
pub struct CacheStage {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    stats: Arc<GatewayStats>,
}

impl CacheStage {
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration, stats: Arc<GatewayStats>) -> Self {
        Self { cache, ttl, stats }
    }
}

#[async_trait]
impl Stage for CacheStage {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn call(&self, call: &GatewayCall, next: Next<'_>) -> Result<Response> {
        if let Some(cached) = self.cache.get(&call.fingerprint).await {
            debug!(fingerprint = %call.fingerprint, "Cache hit");
            self.stats.record_cache_hit();
            return Ok(cached);
        }

        let response = next.run(call).await?;
        if response.is_success() {
            self.cache
                .set(call.fingerprint.clone(), response.clone(), self.ttl)
                .await;
        }
        Ok(response)
    }
}

/// Turns raw provider text into a validated value.
pub struct ParseStage {
    log_raw_output: bool,
}

impl ParseStage {
    pub fn new(log_raw_output: bool) -> Self {
        Self { log_raw_output }
    }
}

#[async_trait]
impl Stage for ParseStage {
    fn name(&self) -> &'static str {
        "parse"
    }

    async fn call(&self, call: &GatewayCall, next: Next<'_>) -> Result<Response> {
        let response = next.run(call).await?;
        if self.log_raw_output {
            debug!(raw_text = %response.raw_text, "Provider output");
        }

        let request = &call.request;
        if request.is_free_text() {
            return Ok(response);
        }

        let raw_text = response.raw_text;
        if request.is_list() {
            let parsed = OutputParser::parse_list(&raw_text, request.schema())?;
            let status = if parsed.skipped_count > 0 {
                ResponseStatus::PartialSuccess
            } else {
                ResponseStatus::Success
            };
            let mut response = Response::parsed(raw_text, parsed.items.into());
            response.status = status;
            response.skipped_count = parsed.skipped_count;
            return Ok(response);
        }

        match request.schema() {
            Some(schema) => {
                let value = OutputParser::parse_object(&raw_text, schema)?;
                Ok(Response::parsed(raw_text, value))
            }
            None => Ok(Response::raw(raw_text)),
        }
    }
}

/// Charges one quota unit per logical call, just before the provider is used.
///
/// The check and the increment happen atomically, so a call that passed the
/// [`QuotaGate`] may still be denied here if concurrent calls used up the budget.
pub struct QuotaMeter {
    quota: Arc<dyn QuotaStore>,
}

impl QuotaMeter {
    pub fn new(quota: Arc<dyn QuotaStore>) -> Self {
        Self { quota }
    }
}

#[async_trait]
impl Stage for QuotaMeter {
    fn name(&self) -> &'static str {
        "quota_meter"
    }

    async fn call(&self, call: &GatewayCall, next: Next<'_>) -> Result<Response> {
        self.quota.try_acquire().await?.into_result()?;
        next.run(call).await
    }
}

/// Re-runs the rest of the chain on retryable failures.
pub struct RetryStage {
    policy: RetryPolicy,
    stats: Arc<GatewayStats>,
}

impl RetryStage {
    pub fn new(policy: RetryPolicy, stats: Arc<GatewayStats>) -> Self {
        Self { policy, stats }
    }
}

#[async_trait]
impl Stage for RetryStage {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn call(&self, call: &GatewayCall, next: Next<'_>) -> Result<Response> {
        let stats = &self.stats;
        self.policy
            .execute(move |attempt| {
                debug!(attempt, fingerprint = %call.fingerprint, "Calling provider");
                stats.record_attempt();
                next.run(call)
            })
            .await
    }
}
