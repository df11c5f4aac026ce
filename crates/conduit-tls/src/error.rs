use std::io;
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to dial {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("tls handshake failed: {source}")]
    Handshake {
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Chain(#[from] conduit_core::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Dial { .. } => "conduit.tls.dial",
            Error::Handshake { .. } => "conduit.tls.handshake",
            Error::Chain(inner) => inner.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
