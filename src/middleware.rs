//! 请求埋点中间件
//!
//! 除 `/metrics` 外的每个请求都会记录请求数、错误数和耗时。记录动作挂在响应体上,
//! 在响应发送完成后执行; 记录失败只打日志, 不影响响应本身。

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use http::{Method, StatusCode};

use crate::{
    handler::METRICS_PATH,
    metrics::http::{HttpMetrics, RequestOutcome},
    util::body::on_completion,
};

/// 单个请求的埋点上下文, 被 drop 时完成记录
struct RequestContext {
    metrics: HttpMetrics,
    method: Method,
    route: Option<MatchedPath>,
    started: Instant,
    status: Option<StatusCode>,
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        // 下游还没产生响应就被取消了 (客户端断开), 不记录
        let Some(status) = self.status else {
            log::debug!("{} {} cancelled before response", self.method, route_or_unknown(&self.route));
            return;
        };
        let outcome = RequestOutcome {
            method: &self.method,
            route: self.route.as_ref().map(MatchedPath::as_str),
            status,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        };
        if let Err(e) = self.metrics.record_request(&outcome) {
            log::warn!("failed to record {} {}: {e}", self.method, route_or_unknown(&self.route));
        }
    }
}

fn route_or_unknown(route: &Option<MatchedPath>) -> &str {
    route.as_ref().map(MatchedPath::as_str).unwrap_or(crate::metrics::http::UNKNOWN_ROUTE)
}

pub async fn track_metrics(State(metrics): State<HttpMetrics>, req: Request, next: Next) -> Response {
    if req.uri().path() == METRICS_PATH {
        return next.run(req).await;
    }
    // 在进入下游之前创建, 保证无论下游如何结束都只记录一次
    let mut ctx = RequestContext {
        metrics,
        method: req.method().clone(),
        route: req.extensions().get::<MatchedPath>().cloned(),
        started: Instant::now(),
        status: None,
    };
    let response = next.run(req).await;
    ctx.status = Some(response.status());
    on_completion(response, ctx)
}
