//! # Error：核心节点图的稳定错误码
//!
//! ## 核心意图（Why）
//! - 日志、指标与告警需要一个不随 `Display` 措辞变化的机读错误标识；
//!
//! ## 行为契约（What）
//! - 每个变体都携带一个 `conduit.<area>.<reason>` 形式的 `code()` 字符串，
//!   传输层与 socks 层的错误类型遵循同一约定，调用方无需解析错误消息文本即可匹配。

use std::io;

use crate::chain::NodeId;

/// 连接构造与分发过程中抛出的错误。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 一个对端引用指向的节点已经不在（或从未在）竞技场中。
    #[error("node {id:?} is not present in this chain")]
    UnknownNode { id: NodeId },

    /// 一个有界内存缓冲区（例如 SOCKS5 客户端的延迟字节缓冲）本该增长超过其配置上限。
    #[error("buffer would exceed the {limit}-byte cap")]
    BufferOverflow { limit: usize },

    /// 调用方本该覆盖的一个钩子被直接调用却没有被覆盖——这是编程错误，必须响亮地失败。
    #[error("required hook `{hook}` was not overridden")]
    UnimplementedHook { hook: &'static str },

    /// 连同触发它的操作一并包装一次 I/O 失败。
    #[error("io error during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// 稳定的、可记录日志的错误码，不随 `Display` 消息变化。
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownNode { .. } => "conduit.core.unknown_node",
            Error::BufferOverflow { .. } => "conduit.core.buffer_overflow",
            Error::UnimplementedHook { .. } => "conduit.core.unimplemented_hook",
            Error::Io { .. } => "conduit.core.io",
        }
    }

    pub fn io(op: &'static str, source: io::Error) -> Self {
        Error::Io { op, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
