//! # Endpoint：绑定双工字节流的节点
//!
//! ## 核心意图（Why）
//! - 一个端点绝不能在图分发调用内部做 I/O（那会在持有 `Chain` 锁的情况下
//!   `.await`，卡住整条连接）；读写必须发生在独立的任务里。
//!
//! ## 架构定位（Where）
//! - 每个端点运行两个独立的 `tokio` 任务：读循环直接读取流并调用进图
//!   （`forward_up`/`forward_down`），写循环排空内部队列并执行真正的
//!   `write_all`；`NodeHandlers` 实现只往队列里推送，从不亲自写流。
//!
//! ## 行为契约（What）
//! - 两种节点都对 `AsyncRead + AsyncWrite` 泛型，而非写死 `TcpStream`：
//!   `conduit-tls` 把已接受或已拨号的 `TcpStream` 包进一层 TLS 会话，再把
//!   得到的流原样交回这里——因此 TLS 只是一次流替换，不是另一种节点类型。

use bytes::{Bytes, BytesMut};
use conduit_core::{Chain, Direction, NodeHandlers, NodeId};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// 绑定在一个已接受的客户端流上的节点：入站端点。
///
/// # 教案式注释
/// - **意图 (Why)**：客户端是其配对的出站/源端节点的上游，入站字节向下游
///   转发；从下游对端送回的字节再写回客户端；
/// - **契约 (What)**：遇到 EOF 或流错误时向下游传播关闭。
pub struct Inbound {
    outgoing: mpsc::UnboundedSender<Bytes>,
}

impl NodeHandlers for Inbound {
    fn on_packet_up(&mut self, _chain: &Chain, _id: NodeId, data: Bytes) {
        // 写循环独占该流；接收端已关闭只意味着连接已经拆除，读循环也会察觉。
        let _ = self.outgoing.send(data);
    }
}

/// 绑定在一个上游（目的地或下一跳代理）流上的节点：出站端点。
///
/// # 教案式注释
/// - **逻辑 (How)**：延迟拨号——构造节点而不立即拨号——在这版 Rust 实现里
///   就是简单地不调用 [`dial`]，直到调用方（某个 SOCKS 前端）已经决定了
///   目的地；没有单独的“未连接/连接中”状态对象需要建模，因为 `dial` 本身
///   是一个要么返回已连接节点、要么返回错误的 `async fn`。
pub struct Outbound {
    outgoing: mpsc::UnboundedSender<Bytes>,
}

impl NodeHandlers for Outbound {
    fn on_packet_down(&mut self, _chain: &Chain, _id: NodeId, data: Bytes) {
        let _ = self.outgoing.send(data);
    }
}

/// 把一个已建立的流接入 `chain`，作为 [`Inbound`] 节点，并为它生成读写任务。
pub fn spawn_inbound<S>(chain: &Chain, stream: S, read_buffer_size: usize) -> NodeId
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    spawn_endpoint(chain, stream, read_buffer_size, EndpointRole::Inbound)
}

/// 把一个已建立的流接入 `chain`，作为 [`Outbound`] 节点，并为它生成读写任务。
/// 供已经自行拨号并包装好流的调用方（例如 `conduit-tls`）直接使用；
/// [`dial`] 只是围绕它的一层纯 TCP 便捷封装。
pub fn spawn_outbound<S>(chain: &Chain, stream: S, read_buffer_size: usize) -> NodeId
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    spawn_endpoint(chain, stream, read_buffer_size, EndpointRole::Outbound)
}

/// 以纯 TCP 拨号 `addr`，并把得到的流接入 `chain` 作为 [`Outbound`] 节点；
/// 连接建立失败时返回 [`Error::Dial`]。
pub async fn dial(chain: &Chain, addr: std::net::SocketAddr, read_buffer_size: usize) -> Result<NodeId> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| Error::Dial { addr, source })?;
    Ok(spawn_outbound(chain, stream, read_buffer_size))
}

#[derive(Clone, Copy)]
enum EndpointRole {
    Inbound,
    Outbound,
}

fn spawn_endpoint<S>(chain: &Chain, stream: S, read_buffer_size: usize, role: EndpointRole) -> NodeId
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let id = match role {
        EndpointRole::Inbound => chain.insert(Box::new(Inbound { outgoing: tx })),
        EndpointRole::Outbound => chain.insert(Box::new(Outbound { outgoing: tx })),
    };

    tokio::spawn(writer_loop(write_half, rx));
    tokio::spawn(reader_loop(chain.clone(), id, read_half, read_buffer_size, role));

    id
}

async fn reader_loop<S>(chain: Chain, id: NodeId, mut read_half: ReadHalf<S>, buffer_size: usize, role: EndpointRole)
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(buffer_size);
    loop {
        buf.clear();
        buf.resize(buffer_size, 0);
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(?id, "peer closed the connection");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                warn!(?id, error = %err, "stream read failed");
                break;
            }
        };
        let data = Bytes::copy_from_slice(&buf[..n]);
        let forwarded = match role {
            EndpointRole::Inbound => chain.forward_down(id, data),
            EndpointRole::Outbound => chain.forward_up(id, data),
        };
        if forwarded.is_err() {
            // 节点已经从图中移除（对面已经关闭），停止读取。
            break;
        }
    }

    let close_direction = match role {
        EndpointRole::Inbound => Direction::Down,
        EndpointRole::Outbound => Direction::Up,
    };
    let _ = chain.propagate_close(id, close_direction);
}

async fn writer_loop<S>(mut write_half: WriteHalf<S>, mut rx: mpsc::UnboundedReceiver<Bytes>)
where
    S: AsyncWrite + Unpin,
{
    while let Some(data) = rx.recv().await {
        if write_half.write_all(&data).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
