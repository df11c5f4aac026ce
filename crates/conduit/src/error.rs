/// 从外观层可能暴露出来的错误。每个变体都包着子 crate 的错误，经 `.code()`
/// 保留其稳定错误码。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] conduit_transport_tcp::Error),

    #[error(transparent)]
    Tls(#[from] conduit_tls::Error),

    #[error(transparent)]
    Socks(#[from] conduit_socks::Error),

    #[error(transparent)]
    Chain(#[from] conduit_core::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Transport(inner) => inner.code(),
            Error::Tls(inner) => inner.code(),
            Error::Socks(inner) => inner.code(),
            Error::Chain(inner) => inner.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
