//! Metric name and label definitions.

/// HTTP request metrics
pub mod http {
    /// Total number of HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "wabridge_http_requests_total";
    /// Duration of HTTP requests in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "wabridge_http_request_duration_seconds";
    /// Number of currently in-flight HTTP requests
    pub const REQUESTS_IN_FLIGHT: &str = "wabridge_http_requests_in_flight";
}

/// Tenant session lifecycle
pub mod session {
    /// Sessions currently registered and not yet finished
    pub const ACTIVE: &str = "wabridge_sessions_active";
    /// Sessions started via `/connect`
    pub const STARTED_TOTAL: &str = "wabridge_sessions_started_total";
    /// Sessions that ended with a fatal error
    pub const FAILURES_TOTAL: &str = "wabridge_session_failures_total";
    /// Reconnect attempts after a transient disconnect
    pub const RECONNECTS_TOTAL: &str = "wabridge_session_reconnects_total";
}

/// Inbound network events
pub mod events {
    /// Events classified for routing, by kind
    pub const RECEIVED_TOTAL: &str = "wabridge_events_received_total";
    /// Events dropped by the tenant's subscription filter
    pub const FILTERED_TOTAL: &str = "wabridge_events_filtered_total";
}

/// Outbound webhook delivery
pub mod webhook {
    /// Successful deliveries
    pub const DELIVERIES_TOTAL: &str = "wabridge_webhook_deliveries_total";
    /// Deliveries dropped after exhausting attempts
    pub const FAILURES_TOTAL: &str = "wabridge_webhook_failures_total";
    /// Duration of a delivery, retries included
    pub const DELIVERY_DURATION_SECONDS: &str = "wabridge_webhook_delivery_duration_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const STATUS: &str = "status";
    pub const KIND: &str = "kind";
    pub const REASON: &str = "reason";
}

/// Standard histogram buckets
pub mod buckets {
    /// HTTP request duration buckets (in seconds), 1ms to 60s
    pub const HTTP_DURATION: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    /// Webhook delivery buckets (in seconds), 5ms to 30s
    pub const WEBHOOK_DURATION: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];
}
