//! Quota-aware, caching gateway to a generative-AI provider.
//!
//! Every AI-backed feature goes through [`GatewayClient`]: calls are checked
//! against hourly and daily budgets, repeated requests are served from an
//! in-memory cache, transient provider failures are retried with backoff, and
//! free-form model text is turned into schema-validated JSON.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod parser;
pub mod pipeline;
pub mod quota;
pub mod request;
pub mod response;
pub mod retry;
pub mod schema;
pub mod stats;
pub mod transport;

pub use cache::{CacheStats, CacheStore, MemoryCache, ResponseCache};
pub use client::{GatewayClient, GatewayClientBuilder};
pub use config::{Config, ConfigError};
pub use error::{
    FailureKind, GatewayError, QuotaWindow, Result, SchemaViolation, TransportError,
};
pub use fingerprint::Fingerprint;
pub use parser::{OutputParser, ParsedList};
pub use quota::{QuotaDecision, QuotaManager, QuotaStore, QuotaUsage};
pub use request::{ModelParams, Request, RequestBuilder};
pub use response::{BatchResponse, Response, ResponseStatus};
pub use retry::RetryPolicy;
pub use schema::Schema;
pub use stats::StatsSummary;
pub use transport::{HttpTransport, Transport};
