//! # conduit-tls
//!
//! TLS 包装适配器：和纯 TCP 一样的 `Inbound`/`Outbound` 节点类型，底层跑在
//! `rustls` 协商出的流上，而不是裸套接字。

mod adapter;
mod config;
mod error;

pub use adapter::{accept_inbound, dial};
pub use config::{TlsClientConfig, TlsServerConfig};
pub use error::{Error, Result};
