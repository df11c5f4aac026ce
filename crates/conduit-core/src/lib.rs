//! # conduit-core
//!
//! 节点图、方向性转发与错误/地址基础类型，供每个 conduit 传输层与协议层
//! crate 共享。

mod address;
mod chain;
mod direction;
pub mod error;
mod processor;

pub use address::Address;
pub use chain::{Chain, NodeHandlers, NodeId};
pub use direction::Direction;
pub use error::{Error, Result};
pub use processor::{PassThrough, Transform};
