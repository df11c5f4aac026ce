use std::io;

/// 解码 SOCKS 帧或驱动一次 SOCKS 会话过程中抛出的错误。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed SOCKS4 request")]
    Socks4Malformed,

    #[error("malformed SOCKS5 frame: {reason}")]
    Socks5Malformed { reason: &'static str },

    #[error("unsupported SOCKS5 address type {atyp:#x}")]
    UnsupportedAtyp { atyp: u8 },

    #[error("SOCKS5 proxy selected method {method:#x}, which is not in our supported list")]
    MethodMismatch { method: u8 },

    #[error("SOCKS5 proxy rejected the request with REP {rep:#x}")]
    ProxyRejected { rep: u8 },

    #[error("unassigned SOCKS5 REP code {rep:#x}")]
    UnassignedRep { rep: u8 },

    #[error("DNS resolution for {host:?} failed: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("add_method/remove_method requires a single byte, got {0} bytes")]
    InvalidMethodValue(usize),

    #[error("deferred buffer would exceed the {limit}-byte cap")]
    BufferOverflow { limit: usize },

    #[error(transparent)]
    Transport(#[from] conduit_transport_tcp::Error),

    #[error(transparent)]
    Chain(#[from] conduit_core::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Socks4Malformed => "socks4.request.malformed",
            Error::Socks5Malformed { .. } => "socks5.frame.malformed",
            Error::UnsupportedAtyp { .. } => "socks5.atyp.unsupported",
            Error::MethodMismatch { .. } => "socks5.method.mismatch",
            Error::ProxyRejected { .. } => "socks5.client.rejected",
            Error::UnassignedRep { .. } => "socks5.client.unassigned_rep",
            Error::Resolve { .. } => "socks4a.resolve.failed",
            Error::InvalidMethodValue(_) => "socks5.method.invalid_value",
            Error::BufferOverflow { .. } => "socks5.client.buffer_overflow",
            Error::Transport(inner) => inner.code(),
            Error::Chain(inner) => inner.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
