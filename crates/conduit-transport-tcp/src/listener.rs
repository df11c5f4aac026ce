use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::ListenerConfig;
use crate::error::{Error, Result};

/// 一个已绑定的 TCP 端口，开启地址复用后接受连接。
pub struct Listener {
    inner: TokioTcpListener,
    config: ListenerConfig,
}

impl Listener {
    pub async fn bind(config: ListenerConfig) -> Result<Self> {
        let domain = match config.bind_addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, None).map_err(|source| Error::Bind {
            addr: config.bind_addr,
            source,
        })?;
        socket.set_reuse_address(true).map_err(|source| Error::Bind {
            addr: config.bind_addr,
            source,
        })?;
        socket.set_nonblocking(true).map_err(|source| Error::Bind {
            addr: config.bind_addr,
            source,
        })?;
        socket
            .bind(&config.bind_addr.into())
            .map_err(|source| Error::Bind { addr: config.bind_addr, source })?;
        socket
            .listen(config.backlog)
            .map_err(|source| Error::Bind { addr: config.bind_addr, source })?;
        let inner = TokioTcpListener::from_std(socket.into()).map_err(|source| Error::Bind {
            addr: config.bind_addr,
            source,
        })?;
        info!(addr = %config.bind_addr, "listening");
        Ok(Listener { inner, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(|source| Error::Accept { source })
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await.map_err(|source| Error::Accept { source })
    }
}

/// 一个正在运行的接受循环的句柄。
///
/// # 教案式注释
/// - **契约 (What)**：丢弃句柄并不会停止循环；调用 `shutdown` 并等待它，
///   才会停止接受新连接并排空在飞的各个连接任务。
pub struct ListenerHandle {
    stop: Arc<Notify>,
    join: tokio::task::JoinHandle<()>,
}

impl ListenerHandle {
    pub async fn shutdown(self) {
        self.stop.notify_one();
        let _ = self.join.await;
    }
}

/// 持续从 `listener` 接受连接直到 `shutdown` 被调用，把每个已接受的流交给
/// `on_accept`。连接处理任务由一个 `JoinSet` 跟踪，这样 `shutdown` 返回前
/// 可以把它们排空。
pub fn serve<F, Fut>(listener: Listener, mut on_accept: F) -> ListenerHandle
where
    F: FnMut(TcpStream, SocketAddr) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let stop = Arc::new(Notify::new());
    let stop_signal = stop.clone();

    let join = tokio::spawn(async move {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = stop_signal.notified() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            connections.spawn(on_accept(stream, peer));
                        }
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                        }
                    }
                }
            }
        }
        while connections.join_next().await.is_some() {}
    });

    ListenerHandle { stop, join }
}
