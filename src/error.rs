use std::fmt::Display;

use axum::response::{IntoResponse, Response};
use hyper::StatusCode;

use crate::render::RenderError;

/// handler 通用错误, 响应 500 并把错误详情带在 body 里
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        tracing::error!(%err, "error");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("ERROR: {}", &err)).into_response()
    }
}

// This enables using `?` on functions that return `Result<_, anyhow::Error>` to turn them into
// `Result<_, AppError>`. That way you don't need to do that manually.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// 页面渲染错误, 只在服务端记录详情, 客户端只看到通用的 500
#[derive(Debug)]
pub struct PageError(RenderError);

impl From<RenderError> for PageError {
    fn from(err: RenderError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let err = self.0;
        tracing::error!(%err, "failed to render page");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
    }
}
