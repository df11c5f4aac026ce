//! # conduit
//!
//! ## 核心意图（Why）
//! - 把一个监听器、一个 SOCKS（或纯透传）前端工厂，以及节点图运行时，
//!   装配成一个可运行的代理。
//!
//! ## 架构定位（Where）
//! - 协议状态机与节点图本身住在 `conduit-core` 与 `conduit-socks` 里；
//!   这个 crate 唯一的职责是逐连接的装配 `inbound.connect(front_end)`，
//!   以及重新导出嵌入方构造前端与出站所需的各个部件。

mod error;
mod server;

pub use conduit_core::{Address, Chain, Direction, NodeHandlers, NodeId, PassThrough, Transform};
pub use conduit_socks::{
    socks5_client_dial, ClientState, Socks4AllowAll, Socks4Decision, Socks4FrontEnd, Socks4Policy, Socks4Variant,
    Socks5AllowAll, Socks5ClientBackEnd, Socks5Decision, Socks5FrontEnd, Socks5Policy, StateChangeHook,
};
pub use conduit_tls::{accept_inbound as tls_accept_inbound, dial as tls_dial, TlsClientConfig, TlsServerConfig};
pub use conduit_transport_tcp::{dial, spawn_inbound, spawn_outbound, Listener, ListenerConfig, ListenerHandle, OutboundConfig};

pub use error::{Error, Result};
pub use server::{FrontEndFactory, ProxyServer};
