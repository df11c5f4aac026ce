//! # TLS 适配器：流替换而非新节点类型
//!
//! ## 核心意图（Why）
//! - 一个已接受或已拨号的 TCP 套接字在成为 `Inbound`/`Outbound` 节点之前，
//!   需要先完成 TLS 握手。
//!
//! ## 行为契约（What）
//! - 这里故意不引入单独的“TLS 节点”类型：`tokio_rustls` 的 `TlsStream` 和
//!   裸 `TcpStream` 一样实现 `AsyncRead + AsyncWrite`，因此可以直接插进
//!   `conduit_transport_tcp` 的通用 `spawn_inbound`/`spawn_outbound`。

use std::net::SocketAddr;

use conduit_core::{Chain, NodeId};
use conduit_transport_tcp::{spawn_inbound, spawn_outbound};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::{TlsClientConfig, TlsServerConfig};
use crate::error::{Error, Result};

/// 在一个已接受的 `stream` 上完成服务端 TLS 握手，并把得到的会话接入
/// `chain` 作为 `Inbound` 节点。
pub async fn accept_inbound(
    chain: &Chain,
    stream: TcpStream,
    server_config: &TlsServerConfig,
    read_buffer_size: usize,
) -> Result<NodeId> {
    let acceptor = TlsAcceptor::from(server_config.0.clone());
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|source| Error::Handshake { source })?;
    Ok(spawn_inbound(chain, tls_stream, read_buffer_size))
}

/// 以纯 TCP 拨号 `addr`，为 `server_name` 完成客户端 TLS 握手，并把得到的
/// 会话接入 `chain` 作为 `Outbound` 节点。
pub async fn dial(
    chain: &Chain,
    addr: SocketAddr,
    server_name: ServerName<'static>,
    client_config: &TlsClientConfig,
    read_buffer_size: usize,
) -> Result<NodeId> {
    let tcp_stream = TcpStream::connect(addr)
        .await
        .map_err(|source| Error::Dial { addr, source })?;
    let connector = TlsConnector::from(client_config.0.clone());
    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|source| Error::Handshake { source })?;
    Ok(spawn_outbound(chain, tls_stream, read_buffer_size))
}
