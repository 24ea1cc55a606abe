//! # 响应体完成回调
//!
//! 把一个 guard 挂在响应体上: 响应体读到末尾、出错或者被 drop 时 guard 被释放,
//! guard 的 `Drop` 就是完成回调。回调因此恰好执行一次, 并且发生在 body 发送完成之后。

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use axum::{body::Body, response::Response};
use http_body::{Frame, SizeHint};
use pin_project_lite::pin_project;

pin_project! {
    /// 在 body 结束时释放 `guard` 的包装
    pub struct OnCompletion<B, G> {
        #[pin]
        inner: B,
        guard: Option<G>,
    }
}

impl<B, G> OnCompletion<B, G> {
    pub fn new(inner: B, guard: G) -> Self {
        Self { inner, guard: Some(guard) }
    }
}

impl<B, G> http_body::Body for OnCompletion<B, G>
where
    B: http_body::Body,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let pro = self.project();
        let frame = pro.inner.poll_frame(cx);
        if matches!(frame, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            drop(pro.guard.take());
        }
        frame
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// 把 guard 挂到响应体上, 响应发送完成后 guard 才会被释放
pub fn on_completion<G>(response: Response, guard: G) -> Response
where
    G: Send + 'static,
{
    response.map(|body| Body::new(OnCompletion::new(body, guard)))
}
