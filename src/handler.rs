use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{ConnectInfo, FromRef, MatchedPath, State},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Local;
use http::{header, StatusCode};
use serde_json::{Map, Value};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    error::{AppError, PageError},
    health::{self, HealthState},
    metrics::{http::HttpMetrics, OPENMETRICS_CONTENT_TYPE},
    middleware::track_metrics,
    render::PageRenderer,
    util::body::on_completion,
};

pub const METRICS_PATH: &str = "/metrics";
const WELCOME_MESSAGE: &str = "Welcome! This service is running and monitored.";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 应用状态 (跨请求共享)
#[derive(Clone)]
pub struct AppState {
    pub metrics: HttpMetrics,
    pub health: Arc<HealthState>,
    pub renderer: Arc<dyn PageRenderer>,
    pub service_name: Arc<str>,
}

impl FromRef<AppState> for HttpMetrics {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

impl FromRef<AppState> for Arc<HealthState> {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

/// 构建路由
///
/// # 路由列表
/// - `GET /`: 状态页
/// - `GET /health`, `GET /healthz`: 存活探针
/// - `GET /readyz`: 就绪探针
/// - `GET /metrics`: Prometheus 指标
pub fn build_router(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    let router = Router::new()
        .route("/", get(homepage))
        .route("/health", get(health::health))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route(METRICS_PATH, get(metrics_handler))
        .fallback(not_found);
    with_layers(router, metrics).with_state(state)
}

/// 中间件栈 (从外到内)
/// 1. 请求埋点
/// 2. TraceLayer: 请求追踪
/// 3. TimeoutLayer: 请求超时控制 (30 秒)
/// 4. CatchPanicLayer: handler panic 转为 500, 使其同样被埋点记录
pub fn with_layers<S>(router: Router<S>, metrics: HttpMetrics) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer((
        middleware::from_fn_with_state(metrics, track_metrics),
        TraceLayer::new_for_http()
            // Create our own span for the request and include the matched path. The matched
            // path is useful for figuring out which handler the request was routed to.
            .make_span_with(make_span)
            // errors are logged where they are produced
            .on_failure(()),
        TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT),
        CatchPanicLayer::new(),
    ))
}

fn make_span(req: &http::Request<axum::body::Body>) -> tracing::Span {
    let method = req.method();
    let path = req.uri().path();
    let matched_path = req.extensions().get::<MatchedPath>().map(|matched_path| matched_path.as_str());
    let client = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| *addr);
    tracing::debug_span!("recv request", %method, %path, matched_path, client = ?client)
}

/// 状态页, 在响应发送完成前计入 `active_homepage_requests`
pub async fn homepage(State(state): State<AppState>) -> Result<Response, PageError> {
    let in_flight = state.metrics.track_homepage();
    let mut data = Map::new();
    data.insert("serviceName".to_owned(), Value::from(&*state.service_name));
    data.insert("message".to_owned(), Value::from(WELCOME_MESSAGE));
    data.insert("deploymentTime".to_owned(), Value::from(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()));
    let html = state.renderer.render("index", &data)?;
    Ok(on_completion(Html(html).into_response(), in_flight))
}

pub async fn metrics_handler(State(metrics): State<HttpMetrics>) -> Result<Response, AppError> {
    let body = metrics.registry().export().inspect_err(|e| log::error!("Failed to encode metrics: {e:?}"))?;
    Ok(([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response())
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
