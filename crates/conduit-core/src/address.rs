//! # Address：代理目的地的统一表示
//!
//! ## 核心意图（Why）
//! - SOCKS4/4a/5 三种协议各自以不同的线格式携带目的地（纯 IPv4、DOMAINNAME、
//!   或 ATYP 标记的 IPv4/域名/IPv6），上层业务不应该关心自己在和哪种线格式打交道。
//!
//! ## 行为契约（What）
//! - `classify`：把一个主机名字符串归类为字面量地址或域名；
//! - `atyp`：给出 SOCKS5 线格式里对应的 ATYP 字节；
//! - 域名解析本身不在这里发生——由拨号方（系统解析器）按需完成。

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// 一个代理目的地：字面量 IPv4/IPv6 地址，或者一个有待拨号方解析的域名。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Domain(String),
}

impl Address {
    /// 按 SOCKS5 客户端后端构造时使用的同一套顺序归类主机串：先试 IPv4，
    /// 再试 IPv6，都不匹配就归为域名。
    pub fn classify(host: &str) -> Self {
        if let Ok(v4) = host.parse::<Ipv4Addr>() {
            return Address::V4(v4);
        }
        if let Ok(v6) = host.parse::<Ipv6Addr>() {
            return Address::V6(v6);
        }
        Address::Domain(host.to_owned())
    }

    /// 这种地址在 SOCKS5 线格式里对应的 ATYP 字节。
    pub fn atyp(&self) -> u8 {
        match self {
            Address::V4(_) => 0x01,
            Address::Domain(_) => 0x03,
            Address::V6(_) => 0x04,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::V4(addr) => write!(f, "{addr}"),
            Address::V6(addr) => write!(f, "{addr}"),
            Address::Domain(name) => write!(f, "{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_v4() {
        assert_eq!(Address::classify("127.0.0.1"), Address::V4(Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn classifies_v6() {
        assert!(matches!(Address::classify("::1"), Address::V6(_)));
    }

    #[test]
    fn classifies_domain() {
        assert_eq!(
            Address::classify("example.com"),
            Address::Domain("example.com".to_owned())
        );
    }
}
