//! 服务自身的指标定义和记录入口

use std::sync::Arc;

use http::{Method, StatusCode};

use super::{MetricDef, MetricKind, MetricRegistry, MetricsError};

/// 无法匹配到路由模板时使用的 route 标签值, 不能使用原始 path, 否则标签基数不可控
pub const UNKNOWN_ROUTE: &str = "unknown";

pub const HTTP_REQUESTS_TOTAL: MetricDef = MetricDef {
    name: "http_requests_total",
    kind: MetricKind::Counter,
    help: "Total number of HTTP requests",
    labels: &["method", "route", "code"],
    buckets: &[],
};

pub const HTTP_ERRORS_TOTAL: MetricDef = MetricDef {
    name: "http_errors_total",
    kind: MetricKind::Counter,
    help: "Total number of HTTP responses with status code >= 400",
    labels: &["route", "code"],
    buckets: &[],
};

pub const HTTP_REQUEST_DURATION_SECONDS: MetricDef = MetricDef {
    name: "http_request_duration_seconds",
    kind: MetricKind::Histogram,
    help: "Duration of HTTP requests in seconds",
    labels: &["method", "route", "code"],
    buckets: &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
};

pub const ACTIVE_HOMEPAGE_REQUESTS: MetricDef = MetricDef {
    name: "active_homepage_requests",
    kind: MetricKind::Gauge,
    help: "Number of homepage requests currently in flight",
    labels: &[],
    buckets: &[],
};

pub const APP_INFO: MetricDef = MetricDef {
    name: "app_info",
    kind: MetricKind::Gauge,
    help: "Application build information, always 1",
    labels: &["version", "env"],
    buckets: &[],
};

pub const ALL_METRICS: &[MetricDef] = &[
    HTTP_REQUESTS_TOTAL,
    HTTP_ERRORS_TOTAL,
    HTTP_REQUEST_DURATION_SECONDS,
    ACTIVE_HOMEPAGE_REQUESTS,
    APP_INFO,
];

/// `http_requests_total` 和 `http_request_duration_seconds` 的标签
#[derive(Debug, Clone, Copy)]
pub struct RequestLabels<'a> {
    pub method: &'a str,
    pub route: &'a str,
    pub code: &'a str,
}

impl<'a> RequestLabels<'a> {
    fn values(&self) -> [&'a str; 3] {
        [self.method, self.route, self.code]
    }
}

/// `http_errors_total` 的标签
#[derive(Debug, Clone, Copy)]
pub struct ErrorLabels<'a> {
    pub route: &'a str,
    pub code: &'a str,
}

impl<'a> ErrorLabels<'a> {
    fn values(&self) -> [&'a str; 2] {
        [self.route, self.code]
    }
}

/// 一次请求的最终结果
#[derive(Debug)]
pub struct RequestOutcome<'a> {
    pub method: &'a Method,
    /// 路由模板, 例如 `/`; `None` 表示没有匹配到任何路由
    pub route: Option<&'a str>,
    pub status: StatusCode,
    pub elapsed_secs: f64,
}

/// 对 [`MetricRegistry`] 的封装, 只暴露本服务需要的几种记录操作
#[derive(Clone)]
pub struct HttpMetrics {
    registry: Arc<MetricRegistry>,
}

impl HttpMetrics {
    /// 注册 [`ALL_METRICS`], 任何注册错误都应该让进程启动失败
    pub fn new(mut registry: MetricRegistry) -> Result<Self, MetricsError> {
        for def in ALL_METRICS {
            registry.register(*def)?;
        }
        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn set_app_info(&self, version: &str, env: &str) -> Result<(), MetricsError> {
        self.registry.gauge_set(APP_INFO.name, &[version, env], 1)
    }

    pub fn record_request(&self, outcome: &RequestOutcome<'_>) -> Result<(), MetricsError> {
        let route = outcome.route.unwrap_or(UNKNOWN_ROUTE);
        let labels = RequestLabels {
            method: outcome.method.as_str(),
            route,
            code: outcome.status.as_str(),
        };
        self.registry.counter_increment(HTTP_REQUESTS_TOTAL.name, &labels.values(), 1)?;
        if outcome.status.as_u16() >= 400 {
            let labels = ErrorLabels { route, code: labels.code };
            self.registry.counter_increment(HTTP_ERRORS_TOTAL.name, &labels.values(), 1)?;
        }
        self.registry
            .histogram_observe(HTTP_REQUEST_DURATION_SECONDS.name, &labels.values(), outcome.elapsed_secs)
    }

    /// gauge 加一, 返回的 guard 被 drop 时减一
    pub fn track_homepage(&self) -> InFlightGuard {
        if let Err(e) = self.registry.gauge_increment(ACTIVE_HOMEPAGE_REQUESTS.name, &[]) {
            log::warn!("failed to track homepage request: {e}");
        }
        InFlightGuard {
            metrics: self.clone(),
        }
    }
}

#[must_use = "the gauge is decremented when the guard is dropped"]
pub struct InFlightGuard {
    metrics: HttpMetrics,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Err(e) = self.metrics.registry.gauge_decrement(ACTIVE_HOMEPAGE_REQUESTS.name, &[]) {
            log::warn!("failed to release homepage request: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> HttpMetrics {
        HttpMetrics::new(MetricRegistry::new()).unwrap()
    }

    fn outcome<'a>(method: &'a Method, route: Option<&'a str>, status: StatusCode) -> RequestOutcome<'a> {
        RequestOutcome {
            method,
            route,
            status,
            elapsed_secs: 0.002,
        }
    }

    #[test]
    fn errors_only_counted_from_400() {
        let metrics = metrics();
        let get = Method::GET;
        metrics.record_request(&outcome(&get, Some("/"), StatusCode::OK)).unwrap();
        metrics.record_request(&outcome(&get, Some("/"), StatusCode::FOUND)).unwrap();
        metrics.record_request(&outcome(&get, None, StatusCode::NOT_FOUND)).unwrap();

        let export = metrics.registry().export().unwrap();
        assert!(export.contains(r#"http_requests_total{method="GET",route="/",code="200"} 1"#));
        assert!(export.contains(r#"http_requests_total{method="GET",route="/",code="302"} 1"#));
        assert!(export.contains(r#"http_requests_total{method="GET",route="unknown",code="404"} 1"#));
        assert!(export.contains(r#"http_errors_total{route="unknown",code="404"} 1"#));
        assert!(!export.contains(r#"http_errors_total{route="/""#));
    }

    #[test]
    fn in_flight_guard_releases_on_drop() {
        let metrics = metrics();
        let first = metrics.track_homepage();
        let second = metrics.track_homepage();
        assert!(metrics.registry().export().unwrap().contains("\nactive_homepage_requests 2\n"));
        drop(first);
        drop(second);
        assert!(metrics.registry().export().unwrap().contains("\nactive_homepage_requests 0\n"));
    }

    #[test]
    fn app_info_is_labelled_with_version_and_env() {
        let metrics = metrics();
        metrics.set_app_info("1.0.0", "dev").unwrap();
        let export = metrics.registry().export().unwrap();
        assert!(export.contains(r#"app_info{version="1.0.0",env="dev"} 1"#));
    }

    #[test]
    fn duplicate_catalogue_registration_fails() {
        let mut registry = MetricRegistry::new();
        registry.register(APP_INFO).unwrap();
        assert!(matches!(HttpMetrics::new(registry), Err(MetricsError::DuplicateMetricName(name)) if name == "app_info"));
    }
}
