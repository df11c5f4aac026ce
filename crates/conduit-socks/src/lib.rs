//! # conduit-socks
//!
//! ## 核心意图（Why）
//! - SOCKS4/4a/5 的协议细节（线格式、握手状态机、策略钩子）理应从节点图与
//!   传输层中分离出来，单独成一层。
//!
//! ## 架构定位（Where）
//! - 前端（`socks4`、`socks5_server`）位于一个裸 `Inbound` 端点的下游，以及
//!   它们拨号出的目的地节点的上游；
//! - 后端（`socks5_client`）位于其连接对端的下游，拨号的是一个 SOCKS5 代理
//!   本身，而不是最终目的地。

mod error;
mod socks4;
mod socks5_client;
mod socks5_server;
mod wire;

pub use error::{Error, Result};
pub use socks4::{AllowAll as Socks4AllowAll, Socks4Decision, Socks4FrontEnd, Socks4Policy, Socks4Variant};
pub use socks5_client::{dial as socks5_client_dial, ClientState, Socks5ClientBackEnd, StateChangeHook};
pub use socks5_server::{AllowAll as Socks5AllowAll, Socks5Decision, Socks5FrontEnd, Socks5Policy};
pub use wire::{decode_address, encode_address};
