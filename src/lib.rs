use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc, time::Duration};

pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod init_log;
pub mod metrics;
pub mod middleware;
pub mod render;
pub mod util;
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

use axum::{extract::Request, response::Response, Router};
use health::HealthState;
use hyper::body::Incoming;
use hyper_util::rt::TokioExecutor;
use log::{info, warn};
use tokio::sync::mpsc;
use tower::{Service, ServiceExt};
use util::{
    format::SocketAddrFormat,
    io::{self, create_dual_stack_listener},
};

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Server {
    pub port: u16,
    router: Router,
    pub idle_timeout: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

pub fn new_server(port: u16, router: Router, shutdown_rx: mpsc::Receiver<()>) -> Server {
    Server {
        port,
        router,
        idle_timeout: Duration::from_secs(120),
        shutdown_rx,
    }
}

impl Server {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub async fn run(mut self) -> Result<(), std::io::Error> {
        let listener = create_dual_stack_listener(self.port).await?;
        info!("listening on port {}. Metrics available at {}", self.port, handler::METRICS_PATH);
        let server = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("start graceful shutdown!");
                    drop(listener);
                    break;
                }
                conn = listener.accept() => {
                    match conn {
                        Ok((conn, client_socket_addr)) => {
                            handle_connection(conn, client_socket_addr, self.router.clone(), server.clone(), &graceful, self.idle_timeout).await;
                        }
                        Err(e) => {
                            warn!("accept error:{e}");
                        }
                    }
                }
            }
        }
        tokio::select! {
            _ = graceful.shutdown() => {
                info!("Gracefully shutdown!");
            },
            _ = tokio::time::sleep(GRACEFUL_SHUTDOWN_TIMEOUT) => {
                info!("Waited {GRACEFUL_SHUTDOWN_TIMEOUT:?} for graceful shutdown, aborting...");
            }
        }
        Ok(())
    }
}

async fn handle_connection<C>(
    conn: C, client_socket_addr: SocketAddr, app: Router, server: hyper_util::server::conn::auto::Builder<TokioExecutor>,
    graceful: &hyper_util::server::graceful::GracefulShutdown, timeout: Duration,
) where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + 'static + Send + Sync,
{
    let timeout_io = Box::pin(io::TimeoutIO::new(conn, timeout));
    use hyper_util::rt::TokioIo;
    let stream = TokioIo::new(timeout_io);
    let mut app = app.into_make_service_with_connect_info::<SocketAddr>();
    let app: axum::middleware::AddExtension<Router, axum::extract::ConnectInfo<SocketAddr>> = unwrap_infallible(app.call(client_socket_addr).await);
    // https://github.com/tokio-rs/axum/blob/main/examples/serve-with-hyper/src/main.rs#L81
    let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| handle(request, app.clone()));

    let conn = server.serve_connection_with_upgrades(stream, hyper_service);
    let conn = graceful.watch(conn.into_owned());

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            handle_hyper_error(client_socket_addr, err);
        }
        log::debug!("connection dropped: {client_socket_addr}");
    });
}

async fn handle(
    request: Request<Incoming>, app: axum::middleware::AddExtension<Router, axum::extract::ConnectInfo<SocketAddr>>,
) -> Result<Response, Infallible> {
    app.oneshot(request).await
}

fn handle_hyper_error(client_socket_addr: SocketAddr, http_err: DynError) {
    use std::error::Error;
    match http_err.downcast_ref::<hyper::Error>() {
        Some(hyper_err) => {
            let level = if hyper_err.is_user() { log::Level::Warn } else { log::Level::Debug };
            let source = hyper_err.source().unwrap_or(hyper_err);
            log::log!(
                level,
                "[hyper {}]: {:?} from {}",
                if hyper_err.is_user() { "user" } else { "system" },
                source,
                SocketAddrFormat(&client_socket_addr)
            );
        }
        None => match http_err.downcast_ref::<std::io::Error>() {
            Some(io_err) => {
                warn!("[hyper io]: [{}] {} from {}", io_err.kind(), io_err, SocketAddrFormat(&client_socket_addr));
            }
            None => {
                warn!("[hyper]: {} from {}", http_err, SocketAddrFormat(&client_socket_addr));
            }
        },
    }
}

/// 收到退出信号后先把就绪状态置为 false, 等待 `drain_delay` 让上游摘掉流量, 再通知 server 开始优雅退出
pub fn shutdown_on_signal(health: Arc<HealthState>, drain_delay: Duration) -> mpsc::Receiver<()> {
    shutdown_on(wait_signal(), health, drain_delay)
}

fn shutdown_on<F>(signal: F, health: Arc<HealthState>, drain_delay: Duration) -> mpsc::Receiver<()>
where
    F: Future<Output = Result<(), DynError>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if let Err(e) = signal.await {
            warn!("failed to listen for shutdown signal: {e}");
            return;
        }
        health.set_ready(false);
        info!("not ready, start draining in {drain_delay:?}");
        tokio::time::sleep(drain_delay).await;
        if let Err(e) = shutdown_tx.send(()).await {
            warn!("failed to notify shutdown: {e}");
        }
    });
    shutdown_rx
}

#[cfg(unix)]
pub async fn wait_signal() -> Result<(), DynError> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate_signal = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = terminate_signal.recv() => {
            info!("receive terminate signal");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("receive ctrl_c signal");
        },
    };
    Ok(())
}

#[cfg(windows)]
pub async fn wait_signal() -> Result<(), DynError> {
    tokio::signal::ctrl_c().await?;
    info!("receive ctrl_c signal");
    Ok(())
}

fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => match err {},
    }
}
