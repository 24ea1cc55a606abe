use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    response::Response,
    Router,
};
use http::{header, Request, StatusCode};
use serde_json::{Map, Value};
use status_page::{
    handler::{build_router, with_layers, AppState},
    health::HealthState,
    metrics::{
        http::{HttpMetrics, ALL_METRICS},
        MetricKind, MetricRegistry,
    },
    render::{PageRenderer, RenderError, TemplateRenderer},
};
use tower::ServiceExt;

fn state_with(renderer: Arc<dyn PageRenderer>) -> AppState {
    AppState {
        metrics: HttpMetrics::new(MetricRegistry::new()).unwrap(),
        health: Arc::new(HealthState::default()),
        renderer,
        service_name: "Test Service".into(),
    }
}

fn app() -> (Router, AppState) {
    let state = state_with(Arc::new(TemplateRenderer::default()));
    (build_router(state.clone()), state)
}

async fn get(router: &Router, uri: &str) -> Response {
    router.clone().oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn scrape(router: &Router) -> String {
    let response = get(router, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    body_string(response).await
}

fn sample(export: &str, series: &str) -> Option<f64> {
    export
        .lines()
        .find_map(|line| line.strip_prefix(series)?.strip_prefix(' ')?.parse().ok())
}

#[tokio::test]
async fn homepage_is_counted_once_and_releases_gauge() {
    let (router, _) = app();
    let response = get(&router, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_string(response).await;
    assert!(html.contains("Test Service"));
    assert!(html.contains("Welcome! This service is running and monitored."));

    let export = scrape(&router).await;
    assert_eq!(sample(&export, r#"http_requests_total{method="GET",route="/",code="200"}"#), Some(1.0));
    assert_eq!(sample(&export, "active_homepage_requests"), Some(0.0));
    assert_eq!(sample(&export, r#"http_request_duration_seconds_count{method="GET",route="/",code="200"}"#), Some(1.0));
}

#[tokio::test]
async fn unknown_route_is_an_error_with_sentinel_label() {
    let (router, _) = app();
    let response = get(&router, "/nonexistent").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "Not Found");

    let export = scrape(&router).await;
    assert_eq!(sample(&export, r#"http_errors_total{route="unknown",code="404"}"#), Some(1.0));
    assert_eq!(sample(&export, r#"http_requests_total{method="GET",route="unknown",code="404"}"#), Some(1.0));
    assert!(!export.contains(r#"code="200""#));
    assert!(!export.contains("nonexistent"));
}

#[tokio::test]
async fn scraping_does_not_measure_itself() {
    let (router, _) = app();
    scrape(&router).await;
    let export = scrape(&router).await;
    assert!(!export.contains("http_requests_total{"));
    assert!(!export.contains(r#"route="/metrics""#));
}

#[tokio::test]
async fn metrics_endpoint_uses_openmetrics_content_type() {
    let (router, _) = app();
    let response = get(&router, "/metrics").await;
    let content_type = response.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
    assert!(content_type.starts_with("application/openmetrics-text"));
    assert!(body_string(response).await.ends_with("# EOF\n"));
}

#[tokio::test]
async fn every_metric_is_exported_before_any_observation() {
    let (router, _) = app();
    let export = scrape(&router).await;
    for def in ALL_METRICS {
        let family = match def.kind {
            MetricKind::Counter => def.name.trim_end_matches("_total"),
            _ => def.name,
        };
        assert!(export.contains(&format!("# HELP {family} ")), "missing HELP for {family}");
        assert!(export.contains(&format!("# TYPE {family} {}", def.kind)), "missing TYPE for {family}");
    }
    assert!(export.contains("# TYPE process_start_time_seconds gauge"));
    assert!(export.contains("# TYPE process_uptime_seconds gauge"));
}

#[tokio::test]
async fn liveness_probes_always_succeed() {
    let (router, state) = app();
    state.health.set_ready(false);

    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");

    let response = get(&router, "/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body, serde_json::json!({"status": "alive"}));
}

#[tokio::test]
async fn readiness_probe_follows_health_state() {
    let (router, state) = app();
    for ready in [true, false, true] {
        state.health.set_ready(ready);
        let response = get(&router, "/readyz").await;
        let expected = match ready {
            true => (StatusCode::OK, serde_json::json!({"status": "ready"})),
            false => (StatusCode::SERVICE_UNAVAILABLE, serde_json::json!({"status": "not ready"})),
        };
        assert_eq!(response.status(), expected.0);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body, expected.1);
    }

    let export = scrape(&router).await;
    assert_eq!(sample(&export, r#"http_requests_total{method="GET",route="/readyz",code="200"}"#), Some(2.0));
    assert_eq!(sample(&export, r#"http_errors_total{route="/readyz",code="503"}"#), Some(1.0));
}

#[tokio::test]
async fn in_flight_homepage_requests_are_visible() {
    let (router, _) = app();
    let first = get(&router, "/").await;
    let second = get(&router, "/").await;

    // 响应体还没有发送完, 两个请求都还在进行中
    let export = scrape(&router).await;
    assert_eq!(sample(&export, "active_homepage_requests"), Some(2.0));
    assert!(!export.contains(r#"route="/",code="200"} "#));

    body_string(first).await;
    body_string(second).await;
    let export = scrape(&router).await;
    assert_eq!(sample(&export, "active_homepage_requests"), Some(0.0));
    assert_eq!(sample(&export, r#"http_requests_total{method="GET",route="/",code="200"}"#), Some(2.0));
}

#[tokio::test]
async fn duration_buckets_are_cumulative() {
    let (router, _) = app();
    for _ in 0..5 {
        body_string(get(&router, "/health").await).await;
    }
    let export = scrape(&router).await;
    let prefix = r#"http_request_duration_seconds_bucket{method="GET",route="/health",code="200","#;
    let buckets: Vec<f64> = export
        .lines()
        .filter(|line| line.starts_with(prefix))
        .filter_map(|line| line.rsplit(' ').next()?.parse().ok())
        .collect();
    assert_eq!(buckets.len(), 12);
    assert!(buckets.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(buckets.last(), Some(&5.0));
    assert_eq!(sample(&export, r#"http_request_duration_seconds_count{method="GET",route="/health",code="200"}"#), Some(5.0));
}

struct FailingRenderer;

impl PageRenderer for FailingRenderer {
    fn render(&self, view: &str, _data: &Map<String, Value>) -> Result<String, RenderError> {
        Err(RenderError::UnknownView(view.to_owned()))
    }
}

#[tokio::test]
async fn render_failure_is_a_generic_500() {
    let state = state_with(Arc::new(FailingRenderer));
    let router = build_router(state);
    let response = get(&router, "/").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_string(response).await;
    assert_eq!(body, "Internal Server Error");
    assert!(!body.contains("index"));

    let export = scrape(&router).await;
    assert_eq!(sample(&export, r#"http_errors_total{route="/",code="500"}"#), Some(1.0));
    assert_eq!(sample(&export, "active_homepage_requests"), Some(0.0));
}

async fn boom() -> &'static str {
    panic!("boom")
}

#[tokio::test]
async fn handler_panic_is_still_recorded() {
    let metrics = HttpMetrics::new(MetricRegistry::new()).unwrap();
    let router: Router = with_layers(Router::new().route("/boom", axum::routing::get(boom)), metrics.clone());

    let response = get(&router, "/boom").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    body_string(response).await;

    let export = metrics.registry().export().unwrap();
    assert_eq!(sample(&export, r#"http_errors_total{route="/boom",code="500"}"#), Some(1.0));
}
