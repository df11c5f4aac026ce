use std::io;
use std::net::SocketAddr;

/// 绑定、接受或拨号 TCP 端点过程中抛出的错误。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {source}")]
    Accept {
        #[source]
        source: io::Error,
    },

    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Chain(#[from] conduit_core::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Bind { .. } => "conduit.tcp.bind",
            Error::Accept { .. } => "conduit.tcp.accept",
            Error::Dial { .. } => "conduit.tcp.dial",
            Error::Chain(inner) => inner.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
