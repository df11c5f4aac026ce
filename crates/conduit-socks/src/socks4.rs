//! # Socks4FrontEnd：SOCKS4 / SOCKS4a 服务端前端
//!
//! ## 核心意图（Why）
//! - 把 SOCKS4/4a 的请求解析、策略裁决、拨号与回复拼接成一个可挂入节点图的
//!   状态机，业务侧只需要提供一个 [`Socks4Policy`]。
//!
//! ## 架构定位（Where）
//! - 位于一个裸 TCP `Inbound` 节点的下游；一旦拨号成功，又成为目的地
//!   `Outbound` 节点的上游：先 `inbound.connect(front_end)`，请求解码完成后
//!   再 `front_end.connect(outbound)`。
//!
//! ## 行为契约（What）
//! - 状态依次经过 `AwaitRequest → Dialing{buffered} → Passthrough`；
//!   拨号期间到达的字节先缓冲，拨号完成后一并冲刷。

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use conduit_core::{Address, Chain, Direction, NodeHandlers, NodeId};
use tracing::{debug, info, warn};

use crate::error::Error;

const CMD_CONNECT: u8 = 0x01;
const CMD_BIND: u8 = 0x02;

const REP_GRANTED: u8 = 90;
const REP_REJECTED: u8 = 91;

/// 前端是否识别 SOCKS4a 的主机名扩展。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Socks4Variant {
    Plain,
    ExtensionA,
}

/// [`Socks4Policy`] 对一次解码出的 CONNECT 请求给出的裁决。
pub enum Socks4Decision {
    Allow { addr: Address, port: u16 },
    Deny,
}

/// 在拨号之前批准、重写或拒绝解码出的 `(addr, port, userid)` 元组的钩子。
///
/// - **契约 (What)**：`Allow` 携带的地址/端口会被同时用于拨号和回复
///   回显——两者必须是同一个元组，否则回复会描述一个代理实际没有连上的目的地。
pub trait Socks4Policy: Send + Sync {
    fn evaluate(&self, addr: &Address, port: u16, userid: &[u8]) -> Socks4Decision;
}

/// 原样拨号请求里要求的目的地，不做任何改写。
pub struct AllowAll;

impl Socks4Policy for AllowAll {
    fn evaluate(&self, addr: &Address, port: u16, _userid: &[u8]) -> Socks4Decision {
        Socks4Decision::Allow { addr: addr.clone(), port }
    }
}

enum State {
    AwaitRequest,
    Dialing { buffered: BytesMut },
    Passthrough,
}

struct Inner {
    parse_buf: BytesMut,
    state: State,
}

/// SOCKS4/4a 服务端前端节点。
pub struct Socks4FrontEnd {
    inner: Arc<Mutex<Inner>>,
    variant: Socks4Variant,
    policy: Arc<dyn Socks4Policy>,
    read_buffer_size: usize,
}

impl Socks4FrontEnd {
    pub fn new(variant: Socks4Variant, policy: Arc<dyn Socks4Policy>, read_buffer_size: usize) -> Self {
        Socks4FrontEnd {
            inner: Arc::new(Mutex::new(Inner {
                parse_buf: BytesMut::new(),
                state: State::AwaitRequest,
            })),
            variant,
            policy,
            read_buffer_size,
        }
    }
}

struct ParsedRequest {
    consumed: usize,
    cmd: u8,
    addr: Address,
    port: u16,
    userid: Vec<u8>,
}

/// 从 `buf` 开头解码一个 SOCKS4/4a 请求。
///
/// - 需要更多字节时返回 `Ok(None)`；版本字节不对时返回 `Err`。
fn parse_request(buf: &[u8], variant: Socks4Variant) -> Result<Option<ParsedRequest>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != 0x04 {
        return Err(Error::Socks4Malformed);
    }
    if buf.len() < 8 {
        return Ok(None);
    }
    let cmd = buf[1];
    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);

    let userid_start = 8;
    let userid_end = match buf[userid_start..].iter().position(|&b| b == 0) {
        Some(p) => userid_start + p,
        None => return Ok(None),
    };
    let userid = buf[userid_start..userid_end].to_vec();
    let mut consumed = userid_end + 1;

    let octets = ip.octets();
    let is_4a_marker = octets[0] == 0 && octets[1] == 0 && octets[2] == 0 && octets[3] != 0;
    if variant == Socks4Variant::ExtensionA && is_4a_marker {
        let host_start = consumed;
        let host_end = match buf[host_start..].iter().position(|&b| b == 0) {
            Some(p) => host_start + p,
            None => return Ok(None),
        };
        let hostname = String::from_utf8_lossy(&buf[host_start..host_end]).into_owned();
        consumed = host_end + 1;
        return Ok(Some(ParsedRequest {
            consumed,
            cmd,
            addr: Address::Domain(hostname),
            port,
            userid,
        }));
    }

    Ok(Some(ParsedRequest {
        consumed,
        cmd,
        addr: Address::V4(ip),
        port,
        userid,
    }))
}

fn build_reply(rep: u8, port: u16, ip: Ipv4Addr) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u8(0x00);
    buf.put_u8(rep);
    buf.put_u16(port);
    buf.extend_from_slice(&ip.octets());
    buf.freeze()
}

/// 回复里要回显的 (port, IP) 对。
///
/// - **契约 (What)**：接收的必须是策略裁决之后的目的地元组，而不是解码出来的
///   原始请求元组——策略可以重写目的地，回复就必须回显重写后的那一份，
///   否则代理会对自己实际连到哪里撒谎。
fn echoed_ip(addr: &Address, requested_port: u16) -> (u16, Ipv4Addr) {
    match addr {
        Address::V4(ip) => (requested_port, *ip),
        _ => (requested_port, Ipv4Addr::new(0, 0, 0, 0)),
    }
}

impl NodeHandlers for Socks4FrontEnd {
    fn on_packet_down(&mut self, chain: &Chain, id: NodeId, data: Bytes) {
        enum Action {
            None,
            Forward(Bytes),
            Reject,
            Dial {
                addr: Address,
                port: u16,
                echo_port: u16,
                echo_ip: Ipv4Addr,
            },
        }

        let action = {
            let mut inner = self.inner.lock().unwrap();
            let Inner { parse_buf, state } = &mut *inner;
            let mut next_state = None;
            let action = match state {
                State::Passthrough => Action::Forward(data),
                State::Dialing { buffered } => {
                    buffered.extend_from_slice(&data);
                    Action::None
                }
                State::AwaitRequest => {
                    parse_buf.extend_from_slice(&data);
                    match parse_request(parse_buf, self.variant) {
                        Err(_) => Action::Reject,
                        Ok(None) => Action::None,
                        Ok(Some(parsed)) => {
                            let remainder = Bytes::copy_from_slice(&parse_buf[parsed.consumed..]);
                            parse_buf.clear();

                            if parsed.cmd != CMD_CONNECT {
                                let _ = parsed.cmd == CMD_BIND; // BIND 可识别，但不支持
                                Action::Reject
                            } else {
                                match self.policy.evaluate(&parsed.addr, parsed.port, &parsed.userid) {
                                    Socks4Decision::Deny => Action::Reject,
                                    Socks4Decision::Allow { addr, port } => {
                                        let (echo_port, echo_ip) = echoed_ip(&addr, port);
                                        next_state = Some(State::Dialing {
                                            buffered: BytesMut::from(&remainder[..]),
                                        });
                                        Action::Dial {
                                            addr,
                                            port,
                                            echo_port,
                                            echo_ip,
                                        }
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
            Action::Reject => {
                let _ = chain.forward_up(id, build_reply(REP_REJECTED, 0, Ipv4Addr::new(0, 0, 0, 0)));
                let _ = chain.propagate_close(id, Direction::Up);
            }
            Action::Dial {
                addr,
                port,
                echo_port,
                echo_ip,
            } => {
                let chain = chain.clone();
                let inner = self.inner.clone();
                let variant = self.variant;
                let read_buffer_size = self.read_buffer_size;
                tokio::spawn(async move {
                    dial_and_continue(chain, id, inner, addr, port, echo_port, echo_ip, variant, read_buffer_size).await;
                });
            }
        }
    }
}

/// 解析并拨号裁决后的目的地；成功则把出站节点接入图、冲刷缓冲字节并回复
/// `REP_GRANTED`，失败则回复 `REP_REJECTED` 并向上关闭。
async fn dial_and_continue(
    chain: Chain,
    id: NodeId,
    inner: Arc<Mutex<Inner>>,
    addr: Address,
    port: u16,
    echo_port: u16,
    echo_ip: Ipv4Addr,
    variant: Socks4Variant,
    read_buffer_size: usize,
) {
    let resolved = resolve(&addr, port, variant).await;
    let socket_addr = match resolved {
        Ok(addr) => addr,
        Err(err) => {
            warn!(?id, error = %err, "socks4 dial target could not be resolved");
            let _ = chain.forward_up(id, build_reply(REP_REJECTED, echo_port, echo_ip));
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
                let flushed = match std::mem::replace(&mut guard.state, State::Passthrough) {
                    State::Dialing { buffered } => buffered.freeze(),
                    _ => Bytes::new(),
                };
                flushed
            };
            info!(?id, dest = %socket_addr, "socks4 connect granted");
            let _ = chain.forward_up(id, build_reply(REP_GRANTED, echo_port, echo_ip));
            if !buffered.is_empty() {
                let _ = chain.forward_down(id, buffered);
            }
        }
        Err(err) => {
            debug!(?id, error = %err, "socks4 dial failed");
            let _ = chain.forward_up(id, build_reply(REP_REJECTED, echo_port, echo_ip));
            let _ = chain.propagate_close(id, Direction::Up);
        }
    }
}

/// 把裁决之后的目的地解析为一个可拨号的 `SocketAddr`；域名只在 4a 扩展下出现。
async fn resolve(addr: &Address, port: u16, variant: Socks4Variant) -> Result<SocketAddr, Error> {
    match addr {
        Address::V4(ip) => Ok(SocketAddr::V4(SocketAddrV4::new(*ip, port))),
        Address::V6(ip) => Ok(SocketAddr::new(std::net::IpAddr::V6(*ip), port)),
        Address::Domain(host) => {
            debug_assert_eq!(variant, Socks4Variant::ExtensionA);
            tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|source| Error::Resolve {
                    host: host.clone(),
                    source,
                })?
                .next()
                .ok_or_else(|| Error::Resolve {
                    host: host.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_connect_request() {
        let req = [0x04, 0x01, 0x1F, 0x08, 0x7F, 0x01, 0x01, 0x02, b't', b'r', b'i', b'x', b'y', 0x00];
        let parsed = parse_request(&req, Socks4Variant::Plain).unwrap().unwrap();
        assert_eq!(parsed.cmd, CMD_CONNECT);
        assert_eq!(parsed.port, 0x1F08);
        assert_eq!(parsed.addr, Address::V4(Ipv4Addr::new(127, 1, 1, 2)));
        assert_eq!(parsed.userid, b"trixy");
        assert_eq!(parsed.consumed, req.len());
    }

    #[test]
    fn incomplete_request_requests_more_bytes() {
        let req = [0x04, 0x01, 0x1F, 0x08, 0x7F, 0x01, 0x01, 0x02, b't'];
        assert!(parse_request(&req, Socks4Variant::Plain).unwrap().is_none());
    }

    #[test]
    fn bad_version_byte_is_rejected() {
        let req = [0x05, 0x01, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(parse_request(&req, Socks4Variant::Plain), Err(Error::Socks4Malformed)));
    }

    #[test]
    fn extension_a_decodes_trailing_hostname() {
        let mut req = vec![0x04, 0x01, 0x00, 0x50, 0x00, 0x00, 0x00, 0x01];
        req.push(0x00); // empty userid
        req.extend_from_slice(b"example.com");
        req.push(0x00);
        let parsed = parse_request(&req, Socks4Variant::ExtensionA).unwrap().unwrap();
        assert_eq!(parsed.addr, Address::Domain("example.com".to_owned()));
        assert_eq!(parsed.consumed, req.len());
    }

    #[test]
    fn plain_variant_ignores_the_4a_marker() {
        let mut req = vec![0x04, 0x01, 0x00, 0x50, 0x00, 0x00, 0x00, 0x01, 0x00];
        req.extend_from_slice(b"example.com\x00");
        let parsed = parse_request(&req, Socks4Variant::Plain).unwrap().unwrap();
        assert_eq!(parsed.addr, Address::V4(Ipv4Addr::new(0, 0, 0, 1)));
        // consumed 停在 userid 终止符处；这个变体下，尾部的主机名字节留在流里
        // 作为普通负载。
        assert_eq!(parsed.consumed, 9);
    }

    #[test]
    fn reply_echoes_requested_port_and_ip() {
        let reply = build_reply(REP_GRANTED, 0x1F08, Ipv4Addr::new(127, 1, 1, 2));
        assert_eq!(&reply[..], &[0x00, 90, 0x1F, 0x08, 127, 1, 1, 2]);
    }

    /// 一个重写目的地的策略，其裁决结果（而非原始请求地址）才是应当回显的那个。
    #[test]
    fn echoed_ip_uses_the_post_policy_tuple_not_the_requested_one() {
        let requested = Address::V4(Ipv4Addr::new(10, 0, 0, 1));
        let rewritten = Address::V4(Ipv4Addr::new(192, 168, 1, 1));
        let decision = Socks4Decision::Allow { addr: rewritten.clone(), port: 4444 };
        let (addr, port) = match decision {
            Socks4Decision::Allow { addr, port } => (addr, port),
            Socks4Decision::Deny => unreachable!(),
        };
        let (echo_port, echo_ip) = echoed_ip(&addr, port);
        assert_eq!(echo_port, 4444);
        assert_eq!(echo_ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_ne!(echo_ip, match requested {
            Address::V4(ip) => ip,
            _ => unreachable!(),
        });
    }
}
