//! Observability module for the broadcast service.
//!
//! # Privacy by Default
//!
//! Instrumented functions use `#[instrument(skip_all)]` with explicit fields.
//! Message content is never logged; only lengths and identifiers.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `bs_connections_active` | Gauge | none | WebSocket sessions on this instance |
//! | `bs_push_total` | Counter | `outcome` | Per-connection push results |
//! | `bs_fanout_targets` | Histogram | none | Active connections per broadcast |
//! | `bs_broadcast_duration_seconds` | Histogram | none | Registry lookup + fan-out time |
//! | `bs_feed_records_total` | Counter | `event`, `status` | Change-feed processing |
//! | `bs_redis_latency_seconds` | Histogram | `operation` | Redis latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_fanout, record_feed_record, record_push, record_redis_latency,
    set_connections_active,
};
