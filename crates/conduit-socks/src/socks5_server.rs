//! # Socks5FrontEnd：SOCKS5 服务端前端
//!
//! ## 核心意图（Why）
//! - 把方法协商、请求解码、策略裁决与拨号拼成一个可挂入节点图的状态机，和
//!   `socks4.rs` 同样的 Arc<Mutex<Inner>> + 拨号任务回调形状，但多一轮方法
//!   协商。
//!
//! ## 行为契约（What）
//! - 状态依次经过 `AwaitMethods → AwaitRequest → Dialing{buffered} →
//!   ProxyActive`；方法不匹配回复 `05 FF` 并关闭；CMD 不是 CONNECT 或版本
//!   字节不对则静默关闭（无回复）。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use conduit_core::{Address, Chain, Direction, NodeHandlers, NodeId};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::wire::{decode_address, encode_address};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;

/// [`Socks5Policy`] 对一次解码出的 CONNECT 请求给出的裁决。
pub enum Socks5Decision {
    Allow { addr: Address, port: u16 },
    Deny,
}

/// 在拨号之前批准、重写或拒绝解码出的 `(addr, port)` 目的地的钩子。
///
/// - **契约 (What)**：`Allow` 携带的元组会被同时用于拨号和成功回复，保证
///   代理回显的就是它实际连上的那个目的地。
pub trait Socks5Policy: Send + Sync {
    fn evaluate(&self, addr: &Address, port: u16) -> Socks5Decision;
}

pub struct AllowAll;

impl Socks5Policy for AllowAll {
    fn evaluate(&self, addr: &Address, port: u16) -> Socks5Decision {
        Socks5Decision::Allow { addr: addr.clone(), port }
    }
}

enum State {
    AwaitMethods,
    AwaitRequest,
    Dialing { buffered: BytesMut },
    ProxyActive,
}

struct Inner {
    parse_buf: BytesMut,
    state: State,
}

pub struct Socks5FrontEnd {
    inner: Arc<Mutex<Inner>>,
    policy: Arc<dyn Socks5Policy>,
    read_buffer_size: usize,
}

impl Socks5FrontEnd {
    pub fn new(policy: Arc<dyn Socks5Policy>, read_buffer_size: usize) -> Self {
        Socks5FrontEnd {
            inner: Arc::new(Mutex::new(Inner {
                parse_buf: BytesMut::new(),
                state: State::AwaitMethods,
            })),
            policy,
            read_buffer_size,
        }
    }
}

/// 解析 `VER | NMETHODS | METHODS[..]`，对长度不一致保持宽容：2 字节头部
/// 一到就按实际到达的方法字节数处理，而不是死等公告的数量——这是一个刻意
/// 的互通性选择。
fn parse_methods(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, Error> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[0] != VERSION {
        return Err(Error::Socks5Malformed { reason: "bad VER byte in method greeting" });
    }
    let nmethods = buf[1] as usize;
    let available = buf.len() - 2;
    let take = nmethods.min(available);
    let methods = buf[2..2 + take].to_vec();
    Ok(Some((methods, 2 + take)))
}

struct ParsedRequest {
    consumed: usize,
    cmd: u8,
    addr: Address,
    port: u16,
}

fn parse_request(buf: &[u8]) -> Result<Option<ParsedRequest>, Error> {
    if buf.len() < 4 {
        return Ok(None);
    }
    if buf[0] != VERSION {
        return Err(Error::Socks5Malformed { reason: "bad VER byte in request" });
    }
    let cmd = buf[1];
    // buf[2] 是 RSV，恒为 0x00。
    let atyp = buf[3];
    match decode_address(atyp, &buf[4..])? {
        None => Ok(None),
        Some((addr, port, used)) => Ok(Some(ParsedRequest {
            consumed: 4 + used,
            cmd,
            addr,
            port,
        })),
    }
}

fn build_reply(rep: u8, addr: &Address, port: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + 18 + 2);
    buf.put_u8(VERSION);
    buf.put_u8(rep);
    buf.put_u8(0x00);
    buf.extend_from_slice(&encode_address(addr, port));
    buf.freeze()
}

impl NodeHandlers for Socks5FrontEnd {
    fn on_packet_down(&mut self, chain: &Chain, id: NodeId, data: Bytes) {
        enum Action {
            None,
            Forward(Bytes),
            MethodReply(Bytes),
            MethodRejectAndClose(Bytes),
            CloseSilently,
            Dial { addr: Address, port: u16 },
        }

        let action = {
            let mut inner = self.inner.lock().unwrap();
            let Inner { parse_buf, state } = &mut *inner;
            let mut next_state = None;
            let action = match state {
                State::ProxyActive => Action::Forward(data),
                State::Dialing { buffered } => {
                    buffered.extend_from_slice(&data);
                    Action::None
                }
                State::AwaitMethods => {
                    parse_buf.extend_from_slice(&data);
                    match parse_methods(parse_buf) {
                        Err(_) => Action::CloseSilently,
                        Ok(None) => Action::None,
                        Ok(Some((methods, consumed))) => {
                            parse_buf.advance_to(consumed);
                            if methods.contains(&METHOD_NO_AUTH) {
                                next_state = Some(State::AwaitRequest);
                                Action::MethodReply(Bytes::from_static(&[VERSION, METHOD_NO_AUTH]))
                            } else {
                                Action::MethodRejectAndClose(Bytes::from_static(&[VERSION, METHOD_NONE_ACCEPTABLE]))
                            }
                        }
                    }
                }
                State::AwaitRequest => {
                    parse_buf.extend_from_slice(&data);
                    match parse_request(parse_buf) {
                        Err(_) => Action::CloseSilently,
                        Ok(None) => Action::None,
                        Ok(Some(parsed)) => {
                            let remainder = Bytes::copy_from_slice(&parse_buf[parsed.consumed..]);
                            parse_buf.clear();
                            if parsed.cmd != CMD_CONNECT {
                                Action::CloseSilently
                            } else {
                                match self.policy.evaluate(&parsed.addr, parsed.port) {
                                    Socks5Decision::Deny => Action::CloseSilently,
                                    Socks5Decision::Allow { addr, port } => {
                                        next_state = Some(State::Dialing {
                                            buffered: BytesMut::from(&remainder[..]),
                                        });
                                        Action::Dial { addr, port }
                                    }
                                }
                            }
                        }
                    }
                }
            };
            if let Some(new_state) = next_state {
                *state = new_state;
            }
            action
        };

        match action {
            Action::None => {}
            Action::Forward(data) => {
                let _ = chain.forward_down(id, data);
            }
            Action::MethodReply(reply) => {
                let _ = chain.forward_up(id, reply);
            }
            Action::MethodRejectAndClose(reply) => {
                let _ = chain.forward_up(id, reply);
                let _ = chain.propagate_close(id, Direction::Up);
            }
            Action::CloseSilently => {
                let _ = chain.propagate_close(id, Direction::Up);
            }
            Action::Dial { addr, port } => {
                let chain = chain.clone();
                let inner = self.inner.clone();
                let read_buffer_size = self.read_buffer_size;
                tokio::spawn(async move {
                    dial_and_continue(chain, id, inner, addr, port, read_buffer_size).await;
                });
            }
        }
    }
}

/// 解析并拨号裁决后的目的地；成功则把出站节点接入图、冲刷缓冲字节并回复
/// `REP_SUCCESS`，失败则回复 `REP_GENERAL_FAILURE` 并向上关闭。两条路径都
/// 用同一个裁决后的 `addr`/`port` 构造回复，不回落到原始请求元组。
async fn dial_and_continue(chain: Chain, id: NodeId, inner: Arc<Mutex<Inner>>, addr: Address, port: u16, read_buffer_size: usize) {
    let socket_addr = match resolve(&addr, port).await {
        Ok(socket_addr) => socket_addr,
        Err(err) => {
            debug!(?id, error = %err, "socks5 resolve failed");
            let _ = chain.forward_up(id, build_reply(REP_GENERAL_FAILURE, &addr, port));
            let _ = chain.propagate_close(id, Direction::Up);
            return;
        }
    };

    match conduit_transport_tcp::dial(&chain, socket_addr, read_buffer_size).await {
        Ok(outbound) => {
            if chain.connect(id, outbound).is_err() {
                return;
            }
            let buffered = {
                let mut guard = inner.lock().unwrap();
                match std::mem::replace(&mut guard.state, State::ProxyActive) {
                    State::Dialing { buffered } => buffered.freeze(),
                    _ => Bytes::new(),
                }
            };
            info!(?id, dest = %socket_addr, "socks5 connect granted");
            let _ = chain.forward_up(id, build_reply(REP_SUCCESS, &addr, port));
            if !buffered.is_empty() {
                let _ = chain.forward_down(id, buffered);
            }
        }
        Err(err) => {
            debug!(?id, error = %err, "socks5 dial failed");
            let _ = chain.forward_up(id, build_reply(REP_GENERAL_FAILURE, &addr, port));
            let _ = chain.propagate_close(id, Direction::Up);
        }
    }
}

/// 把解码出的目的地解析为一个可拨号的地址。字面量 IP 原样通过；DOMAIN
/// 目的地通过系统解析器解析，和 SOCKS4a 扩展的做法一致。
async fn resolve(addr: &Address, port: u16) -> Result<SocketAddr, Error> {
    match addr {
        Address::V4(ip) => Ok(SocketAddr::new((*ip).into(), port)),
        Address::V6(ip) => Ok(SocketAddr::new((*ip).into(), port)),
        Address::Domain(host) => tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|source| Error::Resolve { host: host.clone(), source })?
            .next()
            .ok_or_else(|| {
                warn!(%host, "socks5 domain resolved to no addresses");
                Error::Resolve { host: host.clone(), source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses") }
            }),
    }
}

/// 小工具：丢弃 `BytesMut` 开头的 `n` 个字节，保留其余部分。
trait AdvanceTo {
    fn advance_to(&mut self, n: usize);
}

impl AdvanceTo for BytesMut {
    fn advance_to(&mut self, n: usize) {
        let _ = self.split_to(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_greeting() {
        let buf = [0x05, 0x01, 0x00];
        let (methods, consumed) = parse_methods(&buf).unwrap().unwrap();
        assert_eq!(methods, vec![0x00]);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn tolerates_fewer_method_bytes_than_announced() {
        let buf = [0x05, 0x05, 0x00];
        let (methods, consumed) = parse_methods(&buf).unwrap().unwrap();
        assert_eq!(methods, vec![0x00]);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn parses_domain_request() {
        let mut buf = vec![0x05, 0x01, 0x00, 0x03];
        buf.push(11);
        buf.extend_from_slice(b"example.com");
        buf.extend_from_slice(&80u16.to_be_bytes());
        let parsed = parse_request(&buf).unwrap().unwrap();
        assert_eq!(parsed.addr, Address::Domain("example.com".to_owned()));
        assert_eq!(parsed.port, 80);
        assert_eq!(parsed.consumed, buf.len());
    }

    #[test]
    fn rejects_bad_version_byte() {
        let buf = [0x04, 0x01, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        assert!(matches!(parse_request(&buf), Err(Error::Socks5Malformed { .. })));
    }

    /// 一个重写目的地的策略，成功回复必须带着裁决后的地址，而不是请求里原始的那个。
    #[test]
    fn build_reply_uses_the_post_policy_tuple_not_the_requested_one() {
        let requested = Address::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
        let decision = Socks5Policy::evaluate(&AllowAll, &requested, 80);
        let (addr, port) = match decision {
            Socks5Decision::Allow { addr, port } => (addr, port),
            Socks5Decision::Deny => unreachable!(),
        };
        // AllowAll 不重写，但回复构造函数接受的必须是裁决结果 addr/port，
        // 不是 requested，这样换一个重写策略时行为自动正确。
        let reply = build_reply(REP_SUCCESS, &addr, port);
        assert_eq!(reply[1], REP_SUCCESS);
    }
}
