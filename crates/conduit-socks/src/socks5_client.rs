//! # Socks5ClientBackEnd：以 SOCKS5 代理为跳板的后端节点
//!
//! ## 核心意图（Why）
//! - 有时链路的下一跳不是最终目的地，而是另一个 SOCKS5 代理；这个节点负责
//!   拨通那个代理、完成握手，并在握手完成前先缓冲住下行字节。
//!
//! ## 行为契约（What）
//! - 位于其链路邻居的下游，镜像出站端点的约定：发往目的地的数据经
//!   `on_packet_down` 进入，来自代理套接字的数据经 `chain.forward_up` 转发向上；
//! - 握手完成之前到达的下行字节被缓冲，完成后按原序一次性补发，调用方无需
//!   关心握手是否已经结束。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use conduit_core::{Address, Chain, Direction, NodeHandlers, NodeId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Error;

const VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const DEFERRED_BUFFER_CAP: usize = 1024 * 1024;

/// 客户端握手状态机的各个阶段。`ProxyDisabled` 是协议错误或 REP 失败后进入的
/// 终止态，发生在链路关闭传播之前；它的存在是为了让关闭生效前被调用到的
/// 任何 handler 看到的是"丢弃流量"，而不是去重放已经失效的握手逻辑。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    AwaitMethodSelect,
    AwaitBindResponse,
    ProxyActive,
    ProxyDisabled,
}

/// 每次状态切换时以 `(old, new)` 触发。调用方可以借此在到达 `ProxyActive`
/// 后把这个已经"变回普通连接"的套接字移交给别的出站实现；核心本身不自带
/// 任何这样的策略，这个钩子只是留出了位置。
pub type StateChangeHook = Box<dyn Fn(ClientState, ClientState) + Send + Sync>;

/// `add_method`/`remove_method` 要求一个落在单字节范围内的方法值。
fn single_method_byte(value: usize) -> Result<u8, Error> {
    if value > u8::MAX as usize {
        return Err(Error::InvalidMethodValue(value));
    }
    Ok(value as u8)
}

struct Inner {
    state: ClientState,
    parse_buf: BytesMut,
    deferred: BytesMut,
    methods: Vec<u8>,
    dest: Address,
    dest_port: u16,
    on_state_change: Option<StateChangeHook>,
}

impl Inner {
    fn transition(&mut self, new_state: ClientState) {
        let old = self.state;
        self.state = new_state;
        if let Some(hook) = &self.on_state_change {
            hook(old, new_state);
        }
    }
}

/// SOCKS5 客户端后端节点，独占持有到代理的套接字。
pub struct Socks5ClientBackEnd {
    inner: Arc<Mutex<Inner>>,
    outgoing: mpsc::UnboundedSender<Bytes>,
}

impl Socks5ClientBackEnd {
    /// 把一个方法加入问候报文的方法列表（默认只有 `[0x00]`）。
    pub fn add_method(&self, value: usize) -> Result<(), Error> {
        let byte = single_method_byte(value)?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.methods.contains(&byte) {
            inner.methods.push(byte);
        }
        Ok(())
    }

    /// 从支持的方法列表中移除所有等于 `value` 的项。
    pub fn remove_method(&self, value: usize) -> Result<(), Error> {
        let byte = single_method_byte(value)?;
        let mut inner = self.inner.lock().unwrap();
        inner.methods.retain(|&m| m != byte);
        Ok(())
    }
}

/// # 教案式注释
/// - **意图 (Why)**：拨通 `proxy_addr`，就 `(dest, dest_port)` 与它协商一个
///   SOCKS5 会话，并把生成的后端节点插入 `chain`。
/// - **契约 (What)**：一旦到代理的 TCP 连接建立、初始问候报文已入队，就返回
///   节点 id；与代理的后续协商在后台异步继续，调用方不必等待握手结束。
pub async fn dial(
    chain: &Chain,
    proxy_addr: SocketAddr,
    dest: Address,
    dest_port: u16,
    methods: Vec<u8>,
    on_state_change: Option<StateChangeHook>,
) -> Result<NodeId, Error> {
    let stream = TcpStream::connect(proxy_addr)
        .await
        .map_err(|source| conduit_transport_tcp::Error::Dial { addr: proxy_addr, source })?;
    stream.set_nodelay(true).ok();

    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let inner = Arc::new(Mutex::new(Inner {
        state: ClientState::AwaitMethodSelect,
        parse_buf: BytesMut::new(),
        deferred: BytesMut::new(),
        methods,
        dest,
        dest_port,
        on_state_change,
    }));

    let handlers = Socks5ClientBackEnd { inner: inner.clone(), outgoing: outgoing_tx.clone() };
    let id = chain.insert(Box::new(handlers));

    let (read_half, write_half) = tokio::io::split(stream);
    tokio::spawn(writer_loop(write_half, outgoing_rx));
    tokio::spawn(reader_loop(chain.clone(), id, inner.clone(), read_half, outgoing_tx.clone()));

    let greeting = build_greeting(&inner.lock().unwrap().methods);
    let _ = outgoing_tx.send(greeting);

    Ok(id)
}

fn build_greeting(methods: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + methods.len());
    buf.put_u8(VERSION);
    buf.put_u8(methods.len() as u8);
    buf.extend_from_slice(methods);
    buf.freeze()
}

fn build_connect_request(dest: &Address, port: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 18 + 2);
    buf.put_u8(VERSION);
    buf.put_u8(CMD_CONNECT);
    buf.put_u8(0x00);
    buf.extend_from_slice(&crate::wire::encode_address(dest, port));
    buf.freeze()
}

impl NodeHandlers for Socks5ClientBackEnd {
    fn on_packet_down(&mut self, chain: &Chain, id: NodeId, data: Bytes) {
        let mut overflowed = false;
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                ClientState::ProxyActive => {
                    let _ = self.outgoing.send(data);
                }
                ClientState::ProxyDisabled => {}
                ClientState::AwaitMethodSelect | ClientState::AwaitBindResponse => {
                    if inner.deferred.len() + data.len() > DEFERRED_BUFFER_CAP {
                        inner.transition(ClientState::ProxyDisabled);
                        overflowed = true;
                    } else {
                        inner.deferred.extend_from_slice(&data);
                    }
                }
            }
        }
        if overflowed {
            warn!(?id, limit = DEFERRED_BUFFER_CAP, "socks5 client deferred buffer overflow, closing chain");
            let _ = chain.propagate_close(id, Direction::Up);
        }
    }
}

async fn reader_loop(
    chain: Chain,
    id: NodeId,
    inner: Arc<Mutex<Inner>>,
    mut read_half: tokio::io::ReadHalf<TcpStream>,
    outgoing: mpsc::UnboundedSender<Bytes>,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(?id, "socks5 client backend: proxy closed the connection");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                debug!(?id, error = %err, "socks5 client backend: read error");
                break;
            }
        };

        let mut drained_passthrough: Option<Bytes> = None;
        let outcome = {
            let mut guard = inner.lock().unwrap();
            match guard.state {
                ClientState::ProxyActive => {
                    drained_passthrough = Some(Bytes::copy_from_slice(&buf[..n]));
                    None
                }
                ClientState::ProxyDisabled => None,
                ClientState::AwaitMethodSelect => {
                    guard.parse_buf.extend_from_slice(&buf[..n]);
                    handle_method_select(&mut guard)
                }
                ClientState::AwaitBindResponse => {
                    guard.parse_buf.extend_from_slice(&buf[..n]);
                    handle_bind_response(&mut guard)
                }
            }
        };

        if let Some(data) = drained_passthrough {
            let _ = chain.forward_up(id, data);
            continue;
        }

        match outcome {
            Some(ReaderOutcome::SendConnectRequest(frame)) => {
                let _ = outgoing.send(frame);
            }
            Some(ReaderOutcome::ActivateAndFlush(flushed)) => {
                info!(?id, "socks5 client backend: proxy_active");
                if !flushed.is_empty() {
                    let _ = outgoing.send(flushed);
                }
            }
            Some(ReaderOutcome::ProtocolError) => {
                warn!(?id, "socks5 client backend: protocol error, closing");
                let _ = chain.propagate_close(id, Direction::Up);
                return;
            }
            None => {}
        }
    }
    let _ = chain.propagate_close(id, Direction::Up);
}

enum ReaderOutcome {
    SendConnectRequest(Bytes),
    ActivateAndFlush(Bytes),
    ProtocolError,
}

fn handle_method_select(inner: &mut Inner) -> Option<ReaderOutcome> {
    if inner.parse_buf.len() < 2 {
        return None;
    }
    let frame = inner.parse_buf.split_to(2);
    if frame[0] != VERSION {
        inner.transition(ClientState::ProxyDisabled);
        return Some(ReaderOutcome::ProtocolError);
    }
    let selected = frame[1];
    if !inner.methods.contains(&selected) {
        inner.transition(ClientState::ProxyDisabled);
        return Some(ReaderOutcome::ProtocolError);
    }
    let request = build_connect_request(&inner.dest, inner.dest_port);
    inner.transition(ClientState::AwaitBindResponse);
    Some(ReaderOutcome::SendConnectRequest(request))
}

fn handle_bind_response(inner: &mut Inner) -> Option<ReaderOutcome> {
    if inner.parse_buf.len() < 8 {
        return None;
    }
    if inner.parse_buf[0] != VERSION {
        inner.transition(ClientState::ProxyDisabled);
        return Some(ReaderOutcome::ProtocolError);
    }
    let rep = inner.parse_buf[1];
    inner.parse_buf.clear();
    match rep {
        0x00 => {
            let flushed = std::mem::take(&mut inner.deferred).freeze();
            inner.transition(ClientState::ProxyActive);
            Some(ReaderOutcome::ActivateAndFlush(flushed))
        }
        1..=8 => {
            inner.transition(ClientState::ProxyDisabled);
            Some(ReaderOutcome::ProtocolError)
        }
        _ => {
            inner.transition(ClientState::ProxyDisabled);
            Some(ReaderOutcome::ProtocolError)
        }
    }
}

async fn writer_loop(mut write_half: tokio::io::WriteHalf<TcpStream>, mut outgoing_rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(chunk) = outgoing_rx.recv().await {
        if write_half.write_all(&chunk).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_inner(methods: Vec<u8>) -> Inner {
        Inner {
            state: ClientState::AwaitMethodSelect,
            parse_buf: BytesMut::new(),
            deferred: BytesMut::new(),
            methods,
            dest: Address::Domain("example.com".to_owned()),
            dest_port: 80,
            on_state_change: None,
        }
    }

    #[test]
    fn method_select_advances_to_bind_response() {
        let mut inner = fresh_inner(vec![0x00]);
        inner.parse_buf.extend_from_slice(&[0x05, 0x00]);
        let outcome = handle_method_select(&mut inner);
        assert!(matches!(outcome, Some(ReaderOutcome::SendConnectRequest(_))));
        assert_eq!(inner.state, ClientState::AwaitBindResponse);
    }

    #[test]
    fn method_mismatch_disables_the_proxy() {
        let mut inner = fresh_inner(vec![0x00]);
        inner.parse_buf.extend_from_slice(&[0x05, 0x02]);
        let outcome = handle_method_select(&mut inner);
        assert!(matches!(outcome, Some(ReaderOutcome::ProtocolError)));
        assert_eq!(inner.state, ClientState::ProxyDisabled);
    }

    #[test]
    fn bind_response_success_flushes_deferred_bytes() {
        let mut inner = fresh_inner(vec![0x00]);
        inner.deferred.extend_from_slice(b"ABC");
        inner.state = ClientState::AwaitBindResponse;
        inner.parse_buf.extend_from_slice(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        let outcome = handle_bind_response(&mut inner);
        match outcome {
            Some(ReaderOutcome::ActivateAndFlush(data)) => assert_eq!(&data[..], b"ABC"),
            _ => panic!("expected ActivateAndFlush"),
        }
        assert_eq!(inner.state, ClientState::ProxyActive);
        assert!(inner.deferred.is_empty());
    }

    #[test]
    fn bind_response_failure_rep_closes() {
        let mut inner = fresh_inner(vec![0x00]);
        inner.state = ClientState::AwaitBindResponse;
        inner.parse_buf.extend_from_slice(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        let outcome = handle_bind_response(&mut inner);
        assert!(matches!(outcome, Some(ReaderOutcome::ProtocolError)));
        assert_eq!(inner.state, ClientState::ProxyDisabled);
    }

    #[test]
    fn bind_response_unassigned_rep_is_a_protocol_error() {
        let mut inner = fresh_inner(vec![0x00]);
        inner.state = ClientState::AwaitBindResponse;
        inner.parse_buf.extend_from_slice(&[0x05, 0x09, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        let outcome = handle_bind_response(&mut inner);
        assert!(matches!(outcome, Some(ReaderOutcome::ProtocolError)));
    }
}
