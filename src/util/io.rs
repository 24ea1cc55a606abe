//! 监听 socket 和带空闲超时的连接包装

use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpListener,
    time::{sleep, Instant, Sleep},
};

/// 监听 `[::]:port`, 同时接受 IPv4 和 IPv6 连接
pub(crate) async fn create_dual_stack_listener(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?; // 支持快速重启
    socket.set_only_v6(false)?;
    let addr = SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 0], port));
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener = std::net::TcpListener::from(socket);
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

pin_project! {
    /// 读写空闲超过 `timeout` 后返回 `TimedOut`, 任何一次读写完成都会重置计时
    #[derive(Debug)]
    pub struct TimeoutIO<T> {
        #[pin]
        inner: T,
        timeout: Duration,
        #[pin]
        idle: Sleep,
    }
}

impl<T> TimeoutIO<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            idle: sleep(timeout),
        }
    }
}

/// 根据内层 poll 的结果重置或检查空闲计时
fn check_idle<R>(mut idle: Pin<&mut Sleep>, timeout: Duration, cx: &mut Context<'_>, polled: Poll<io::Result<R>>, op: &str) -> Poll<io::Result<R>> {
    if polled.is_ready() {
        idle.as_mut().reset(Instant::now() + timeout);
        return polled;
    }
    match idle.poll(cx) {
        Poll::Ready(()) => Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, format!("{op} idle for {timeout:?}")))),
        Poll::Pending => Poll::Pending,
    }
}

impl<T: AsyncRead> AsyncRead for TimeoutIO<T> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let polled = pro.inner.poll_read(cx, buf);
        check_idle(pro.idle, *pro.timeout, cx, polled, "read")
    }
}

impl<T: AsyncWrite> AsyncWrite for TimeoutIO<T> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let pro = self.project();
        let polled = pro.inner.poll_write(cx, buf);
        check_idle(pro.idle, *pro.timeout, cx, polled, "write")
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let polled = pro.inner.poll_flush(cx);
        check_idle(pro.idle, *pro.timeout, cx, polled, "write")
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let pro = self.project();
        let polled = pro.inner.poll_shutdown(cx);
        check_idle(pro.idle, *pro.timeout, cx, polled, "write")
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[io::IoSlice<'_>]) -> Poll<io::Result<usize>> {
        let pro = self.project();
        let polled = pro.inner.poll_write_vectored(cx, bufs);
        check_idle(pro.idle, *pro.timeout, cx, polled, "write")
    }
}
