use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_service_http_requests_total",
            "Total HTTP requests handled by realtime-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create realtime_service_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_service_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "realtime_service_http_request_duration_seconds",
            "HTTP request latency for realtime-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .expect("failed to create realtime_service_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register realtime_service_http_request_duration_seconds");
    histogram
});

static LIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_service_live_connections",
        "Currently registered WebSocket connections",
    )
    .expect("failed to create realtime_service_live_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register realtime_service_live_connections");
    gauge
});

static MESSAGES_POSTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_service_messages_posted_total",
        "Chat messages accepted by post_message",
    )
    .expect("failed to create realtime_service_messages_posted_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_service_messages_posted_total");
    counter
});

static SESSIONS_OPENED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_service_sessions_opened_total",
        "Chat sessions opened",
    )
    .expect("failed to create realtime_service_sessions_opened_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_service_sessions_opened_total");
    counter
});

static SESSIONS_CLOSED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_service_sessions_closed_total",
        "Chat sessions closed",
    )
    .expect("failed to create realtime_service_sessions_closed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_service_sessions_closed_total");
    counter
});

static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_service_deliveries_total",
            "Per-channel notification delivery outcomes",
        ),
        &["channel", "state"],
    )
    .expect("failed to create realtime_service_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_service_deliveries_total");
    counter
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn set_live_connections(count: usize) {
    LIVE_CONNECTIONS.set(count as i64);
}

pub fn observe_message_posted() {
    MESSAGES_POSTED_TOTAL.inc();
}

pub fn observe_session_opened() {
    SESSIONS_OPENED_TOTAL.inc();
}

pub fn observe_session_closed() {
    SESSIONS_CLOSED_TOTAL.inc();
}

pub fn observe_delivery(channel: &str, state: &str) {
    DELIVERIES_TOTAL.with_label_values(&[channel, state]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::Instant;

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let path = req.path().to_string();
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                }
                Err(_) => {
                    observe_http_request(&method, &path, 500, elapsed);
                }
            }
            result
        })
    }
}
