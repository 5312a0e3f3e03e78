//! Server Metrics - HTTP and guild traffic counters with Prometheus + JSON export
//!
//! Uses lock-free atomics for all counters. Engine-side counters (rejections,
//! flushes, persisted stronghold fields) come from the guild directory
//! snapshot, so scraping never touches the engine lock.
//!
//! ## Endpoints
//! - `GET /metrics` - Prometheus text format
//! - `GET /metrics/json` - JSON format

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::api::ApiState;

/// Shared metrics state (all lock-free atomics)
#[derive(Debug)]
pub struct ServerMetrics {
    /// Total HTTP requests served
    pub total_requests: AtomicU64,
    /// Total request errors (4xx + 5xx)
    pub total_errors: AtomicU64,
    /// Cumulative request duration in microseconds (for computing average)
    pub total_duration_us: AtomicU64,
    /// Requests handed to the authority link
    pub authority_requests: AtomicU64,
    /// Replies received from the authority link
    pub authority_replies: AtomicU64,
    /// Client notifications pushed by the engine
    pub notifications: AtomicU64,
    /// Script events and stronghold broadcasts fired
    pub script_events: AtomicU64,
    /// Server start time (for uptime calculation)
    pub start_time: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_duration_us: AtomicU64::new(0),
            authority_requests: AtomicU64::new(0),
            authority_replies: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            script_events: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl ServerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, duration_us: u64, is_error: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us.fetch_add(duration_us, Ordering::Relaxed);
        if is_error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_authority_request(&self) {
        self.authority_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_authority_reply(&self) {
        self.authority_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_script_event(&self) {
        self.script_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn requests_per_second(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed) as f64;
        let uptime = self.uptime_secs();
        if uptime > 0.0 { total / uptime } else { 0.0 }
    }

    pub fn avg_duration_ms(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        let dur_us = self.total_duration_us.load(Ordering::Relaxed);
        if total > 0 {
            (dur_us as f64 / total as f64) / 1000.0
        } else {
            0.0
        }
    }
}

// ============================================================================
// Axum Middleware - Automatic request tracking
// ============================================================================

/// Middleware that records request count and duration for every HTTP request.
pub async fn metrics_middleware(
    State(state): State<ApiState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let resp = next.run(req).await;
    let duration_us = start.elapsed().as_micros() as u64;
    let is_error = resp.status().is_client_error() || resp.status().is_server_error();

    state.metrics.record_request(duration_us, is_error);
    resp
}

// ============================================================================
// GET /metrics - Prometheus text exposition format
// ============================================================================

pub async fn prometheus_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let m = &state.metrics;
    let total_requests = m.total_requests.load(Ordering::Relaxed);
    let total_errors = m.total_errors.load(Ordering::Relaxed);
    let authority_requests = m.authority_requests.load(Ordering::Relaxed);
    let authority_replies = m.authority_replies.load(Ordering::Relaxed);
    let notifications = m.notifications.load(Ordering::Relaxed);
    let script_events = m.script_events.load(Ordering::Relaxed);
    let uptime = m.uptime_secs();

    let (guild_count, sessions, tick, stats, pool_records) = {
        let dir = state.directory.read().unwrap_or_else(|e| e.into_inner());
        (dir.guilds.len(), dir.online_sessions, dir.tick, dir.stats, dir.exp_pool_records)
    };

    let body = format!(
        "# HELP guild_http_requests_total Total HTTP requests served\n\
         # TYPE guild_http_requests_total counter\n\
         guild_http_requests_total {total_requests}\n\
         \n\
         # HELP guild_http_request_errors_total Total HTTP request errors (4xx/5xx)\n\
         # TYPE guild_http_request_errors_total counter\n\
         guild_http_request_errors_total {total_errors}\n\
         \n\
         # HELP guild_authority_requests_total Requests sent to the authority\n\
         # TYPE guild_authority_requests_total counter\n\
         guild_authority_requests_total {authority_requests}\n\
         \n\
         # HELP guild_authority_replies_total Replies received from the authority\n\
         # TYPE guild_authority_replies_total counter\n\
         guild_authority_replies_total {authority_replies}\n\
         \n\
         # HELP guild_notifications_total Client notifications pushed\n\
         # TYPE guild_notifications_total counter\n\
         guild_notifications_total {notifications}\n\
         \n\
         # HELP guild_script_events_total Script events fired\n\
         # TYPE guild_script_events_total counter\n\
         guild_script_events_total {script_events}\n\
         \n\
         # HELP guild_actions_rejected_total Player guild actions rejected\n\
         # TYPE guild_actions_rejected_total counter\n\
         guild_actions_rejected_total {rejected}\n\
         \n\
         # HELP guild_exp_records_flushed_total Experience records written back\n\
         # TYPE guild_exp_records_flushed_total counter\n\
         guild_exp_records_flushed_total {flushed}\n\
         \n\
         # HELP guild_stronghold_fields_persisted_total Drifted stronghold fields saved\n\
         # TYPE guild_stronghold_fields_persisted_total counter\n\
         guild_stronghold_fields_persisted_total {persisted}\n\
         \n\
         # HELP guild_exp_pool_records Pending experience records\n\
         # TYPE guild_exp_pool_records gauge\n\
         guild_exp_pool_records {pool_records}\n\
         \n\
         # HELP guild_replicated_guilds Guilds replicated locally\n\
         # TYPE guild_replicated_guilds gauge\n\
         guild_replicated_guilds {guild_count}\n\
         \n\
         # HELP guild_online_sessions Live sessions\n\
         # TYPE guild_online_sessions gauge\n\
         guild_online_sessions {sessions}\n\
         \n\
         # HELP guild_tick_total Total server ticks processed\n\
         # TYPE guild_tick_total counter\n\
         guild_tick_total {tick}\n\
         \n\
         # HELP guild_uptime_seconds Server uptime\n\
         # TYPE guild_uptime_seconds gauge\n\
         guild_uptime_seconds {uptime:.2}\n",
        rejected = stats.actions_rejected,
        flushed = stats.exp_records_flushed,
        persisted = stats.stronghold_fields_persisted,
    );

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

// ============================================================================
// GET /metrics/json
// ============================================================================

#[derive(Serialize)]
pub struct JsonMetrics {
    pub uptime_secs: f64,
    pub tick: u64,
    pub guild_count: usize,
    pub online_sessions: usize,
    pub siege_active: bool,
    pub total_requests: u64,
    pub total_errors: u64,
    pub rps: f64,
    pub avg_request_duration_ms: f64,
    pub authority_requests: u64,
    pub authority_replies: u64,
    pub notifications: u64,
    pub script_events: u64,
    pub actions_rejected: u64,
    pub exp_records_flushed: u64,
    pub stronghold_fields_persisted: u64,
}

pub async fn json_metrics_handler(State(state): State<ApiState>) -> Json<JsonMetrics> {
    let m = &state.metrics;
    let dir = state.directory.read().unwrap_or_else(|e| e.into_inner());

    Json(JsonMetrics {
        uptime_secs: m.uptime_secs(),
        tick: dir.tick,
        guild_count: dir.guilds.len(),
        online_sessions: dir.online_sessions,
        siege_active: dir.siege_active,
        total_requests: m.total_requests.load(Ordering::Relaxed),
        total_errors: m.total_errors.load(Ordering::Relaxed),
        rps: m.requests_per_second(),
        avg_request_duration_ms: m.avg_duration_ms(),
        authority_requests: m.authority_requests.load(Ordering::Relaxed),
        authority_replies: m.authority_replies.load(Ordering::Relaxed),
        notifications: m.notifications.load(Ordering::Relaxed),
        script_events: m.script_events.load(Ordering::Relaxed),
        actions_rejected: dir.stats.actions_rejected,
        exp_records_flushed: dir.stats.exp_records_flushed,
        stronghold_fields_persisted: dir.stats.stronghold_fields_persisted,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_metrics_defaults() {
        let m = ServerMetrics::default();
        assert_eq!(m.total_requests.load(Ordering::Relaxed), 0);
        assert_eq!(m.authority_requests.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_request() {
        let m = ServerMetrics::default();
        m.record_request(1500, false);
        m.record_request(2500, true);
        m.record_request(1000, false);

        assert_eq!(m.total_requests.load(Ordering::Relaxed), 3);
        assert_eq!(m.total_errors.load(Ordering::Relaxed), 1);
        assert_eq!(m.total_duration_us.load(Ordering::Relaxed), 5000);
    }

    #[test]
    fn test_guild_traffic_counters() {
        let m = ServerMetrics::default();
        m.record_authority_request();
        m.record_authority_request();
        m.record_authority_reply();
        m.record_notification();
        m.record_script_event();
        assert_eq!(m.authority_requests.load(Ordering::Relaxed), 2);
        assert_eq!(m.authority_replies.load(Ordering::Relaxed), 1);
        assert_eq!(m.notifications.load(Ordering::Relaxed), 1);
        assert_eq!(m.script_events.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_avg_duration_ms() {
        let m = ServerMetrics::default();
        m.record_request(3000, false);
        m.record_request(5000, false);
        assert!((m.avg_duration_ms() - 4.0).abs() < 0.01);
    }
}
