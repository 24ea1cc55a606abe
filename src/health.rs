//! 存活 / 就绪探针
//!
//! 探针只检查进程内状态, 不访问任何下游依赖。

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use axum::{extract::State, Json};
use http::StatusCode;
use serde::Serialize;

/// 进程级别的就绪状态, 启动时为就绪
#[derive(Debug)]
pub struct HealthState {
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
        }
    }
}

impl HealthState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        let previous = self.ready.swap(ready, Ordering::AcqRel);
        if previous != ready {
            log::info!("readiness changed: {previous} -> {ready}");
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ProbeStatus {
    status: &'static str,
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn healthz() -> Json<ProbeStatus> {
    Json(ProbeStatus { status: "alive" })
}

pub async fn readyz(State(health): State<Arc<HealthState>>) -> (StatusCode, Json<ProbeStatus>) {
    match health.is_ready() {
        true => (StatusCode::OK, Json(ProbeStatus { status: "ready" })),
        false => (StatusCode::SERVICE_UNAVAILABLE, Json(ProbeStatus { status: "not ready" })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readiness_follows_flag() {
        let health = Arc::new(HealthState::default());
        assert!(health.is_ready());
        let (status, Json(body)) = readyz(State(health.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ready");

        health.set_ready(false);
        let (status, Json(body)) = readyz(State(health.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "not ready");

        health.set_ready(true);
        assert_eq!(readyz(State(health)).await.0, StatusCode::OK);
    }
}
