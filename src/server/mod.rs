// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Axum web server layer

pub mod handlers;
pub mod responses;

use crate::config::Config;
use crate::engine::shield::ShieldEngine;
use crate::engine_core::constants::defaults;
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::Verdict;
use crate::server::responses::ApiError;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use lru::LruCache;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Prometheus metrics for the boundary.
pub struct Metrics {
    registry: Registry,
    checks_total: IntCounterVec,
    check_latency: Histogram,
    rules: IntGauge,
    killed: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, ShieldError> {
        let registry = Registry::new();
        let checks_total = IntCounterVec::new(
            Opts::new("policyshield_checks_total", "Checks by verdict"),
            &["verdict"],
        )
        .map_err(|e| ShieldError::Config(e.to_string()))?;
        let check_latency = Histogram::with_opts(HistogramOpts::new(
            "policyshield_check_latency_seconds",
            "Full check latency",
        ))
        .map_err(|e| ShieldError::Config(e.to_string()))?;
        let rules = IntGauge::new("policyshield_rules", "Loaded rule count")
            .map_err(|e| ShieldError::Config(e.to_string()))?;
        let killed = IntGauge::new("policyshield_killed", "Kill switch state")
            .map_err(|e| ShieldError::Config(e.to_string()))?;
        for collector in [
            Box::new(checks_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(check_latency.clone()),
            Box::new(rules.clone()),
            Box::new(killed.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| ShieldError::Config(e.to_string()))?;
        }
        Ok(Self {
            registry,
            checks_total,
            check_latency,
            rules,
            killed,
        })
    }

    pub fn observe_check(&self, verdict: Verdict, latency_secs: f64) {
        self.checks_total
            .with_label_values(&[verdict.as_str()])
            .inc();
        self.check_latency.observe(latency_secs);
    }

    pub fn set_rules(&self, count: i64) {
        self.rules.set(count);
    }

    pub fn set_killed(&self, killed: bool) {
        self.killed.set(i64::from(killed));
    }

    pub fn render(&self) -> Result<String, ShieldError> {
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ShieldError::Internal(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| ShieldError::Internal(e.to_string()))
    }
}

struct LockoutRecord {
    failures: u32,
    locked_until: Option<Instant>,
    last: Instant,
}

const LOCKOUT_MAP_CAP: usize = 10_000;
const LOCKOUT_THRESHOLD: u32 = 5;

struct IdempotentEntry {
    body: Value,
    created: Instant,
}

/// Application state shared by every handler.
///
/// All components are wrapped in Arc for shared ownership across tasks.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ShieldEngine>,
    pub config: Arc<Config>,
    pub check_permits: Arc<Semaphore>,
    pub metrics: Arc<Metrics>,
    idempotency: Arc<Mutex<LruCache<String, IdempotentEntry>>>,
    draining: Arc<AtomicBool>,
    admin_lockout: Arc<Mutex<HashMap<String, LockoutRecord>>>,
}

impl AppState {
    pub fn new(engine: Arc<ShieldEngine>, config: Arc<Config>) -> Result<Self, ShieldError> {
        let idem_cap = NonZeroUsize::new(defaults::IDEMPOTENCY_CAPACITY).expect("nonzero");
        Ok(Self {
            check_permits: Arc::new(Semaphore::new(config.max_concurrent_checks)),
            metrics: Arc::new(Metrics::new()?),
            idempotency: Arc::new(Mutex::new(LruCache::new(idem_cap))),
            draining: Arc::new(AtomicBool::new(false)),
            admin_lockout: Arc::new(Mutex::new(HashMap::new())),
            engine,
            config,
        })
    }

    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::Release);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn drain_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.draining)
    }

    pub(crate) fn idempotent_lookup(&self, key: &str) -> Option<Value> {
        let ttl = Duration::from_secs(defaults::IDEMPOTENCY_TTL_SECS);
        let mut cache = lock(&self.idempotency);
        match cache.get(key) {
            Some(entry) if entry.created.elapsed() <= ttl => Some(entry.body.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn idempotent_store(&self, key: String, body: Value) {
        let mut cache = lock(&self.idempotency);
        cache.put(
            key,
            IdempotentEntry {
                body,
                created: Instant::now(),
            },
        );
    }

    pub(crate) fn is_locked_out(&self, ip: &str) -> bool {
        let map = lock(&self.admin_lockout);
        map.get(ip)
            .and_then(|r| r.locked_until)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    pub(crate) fn record_auth_failure(&self, ip: &str) {
        let mut map = lock(&self.admin_lockout);
        if map.len() >= LOCKOUT_MAP_CAP {
            let now = Instant::now();
            map.retain(|_, r| {
                r.locked_until.map(|u| u > now).unwrap_or(false)
                    || now.duration_since(r.last) < Duration::from_secs(3600)
            });
        }
        let record = map.entry(ip.to_string()).or_insert(LockoutRecord {
            failures: 0,
            locked_until: None,
            last: Instant::now(),
        });
        record.failures += 1;
        record.last = Instant::now();
        if record.failures >= LOCKOUT_THRESHOLD {
            let exponent = (record.failures - LOCKOUT_THRESHOLD).min(6);
            let lockout = Duration::from_secs((60u64 << exponent).min(3600));
            record.locked_until = Some(Instant::now() + lockout);
            warn!(%ip, failures = record.failures, ?lockout, "admin auth lockout");
        }
    }

    pub(crate) fn clear_auth_failures(&self, ip: &str) {
        lock(&self.admin_lockout).remove(ip);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Drain gate plus Content-Length rejection, applied before any handler.
async fn gate_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let health_exempt = path == "/healthz" || path == "/api/v1/health";
    if state.is_draining() && !health_exempt {
        return ApiError::overloaded("Server is draining").into_response();
    }
    if let Some(length) = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if length > state.config.max_request_size {
            return ApiError::payload_too_large().into_response();
        }
    }
    next.run(request).await
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the router with all routes and middleware.
///
/// Middleware (outermost first): tracing, CORS, drain/size gate, body
/// limit. Auth is enforced per handler because API and admin endpoints
/// use different tokens.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_request_size;
    Router::new()
        .route("/api/v1/check", post(handlers::check_handler))
        .route("/api/v1/post-check", post(handlers::post_check_handler))
        .route("/api/v1/health", get(handlers::health_handler))
        .route("/api/v1/constraints", get(handlers::constraints_handler))
        .route("/api/v1/reload", post(handlers::reload_handler))
        .route("/api/v1/kill", post(handlers::kill_handler))
        .route("/api/v1/resume", post(handlers::resume_handler))
        .route("/api/v1/status", get(handlers::status_handler))
        .route(
            "/api/v1/check-approval",
            post(handlers::check_approval_handler),
        )
        .route(
            "/api/v1/respond-approval",
            post(handlers::respond_approval_handler),
        )
        .route(
            "/api/v1/pending-approvals",
            get(handlers::pending_approvals_handler),
        )
        .route("/healthz", get(handlers::healthz_handler))
        .route("/readyz", get(handlers::readyz_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gate_middleware,
        ))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
