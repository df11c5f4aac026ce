//! # Wire：SOCKS5 共享的线格式编解码
//!
//! SOCKS5 服务端与客户端后端共用的 ATYP 标记地址 + 端口编解码，避免两处各写一份。

use bytes::{BufMut, Bytes, BytesMut};
use conduit_core::Address;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};

/// 从 `rest`（紧跟在 ATYP 字节本身之后的字节）解码一个 ATYP 标记地址和一个
/// 大端端口号。
///
/// - **返回值**：地址、端口，以及消耗掉的 `rest` 字节数；
/// - `rest` 不够长时返回 `Ok(None)`，由调用方决定等待更多字节还是直接报错。
pub fn decode_address(atyp: u8, rest: &[u8]) -> Result<Option<(Address, u16, usize)>> {
    match atyp {
        0x01 => {
            if rest.len() < 6 {
                return Ok(None);
            }
            let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
            let port = u16::from_be_bytes([rest[4], rest[5]]);
            Ok(Some((Address::V4(ip), port, 6)))
        }
        0x03 => {
            if rest.is_empty() {
                return Ok(None);
            }
            let len = rest[0] as usize;
            let total = 1 + len + 2;
            if rest.len() < total {
                return Ok(None);
            }
            let host = String::from_utf8_lossy(&rest[1..1 + len]).into_owned();
            let port = u16::from_be_bytes([rest[1 + len], rest[2 + len]]);
            Ok(Some((Address::Domain(host), port, total)))
        }
        0x04 => {
            if rest.len() < 18 {
                return Ok(None);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&rest[..16]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([rest[16], rest[17]]);
            Ok(Some((Address::V6(ip), port, 18)))
        }
        other => Err(Error::UnsupportedAtyp { atyp: other }),
    }
}

/// 为 `addr`/`port` 编码出 `ATYP | ADDR | PORT`。
pub fn encode_address(addr: &Address, port: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 18 + 2);
    buf.put_u8(addr.atyp());
    match addr {
        Address::V4(ip) => buf.extend_from_slice(&ip.octets()),
        Address::V6(ip) => buf.extend_from_slice(&ip.octets()),
        Address::Domain(host) => {
            buf.put_u8(host.len() as u8);
            buf.extend_from_slice(host.as_bytes());
        }
    }
    buf.put_u16(port);
    buf.freeze()
}
