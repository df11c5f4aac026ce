use std::sync::Arc;

use rustls::client::Resumption;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

/// 服务端 TLS 配置，可直接交给 [`crate::accept_inbound`] 使用。
#[derive(Clone)]
pub struct TlsServerConfig(pub(crate) Arc<ServerConfig>);

/// 客户端 TLS 配置，可直接交给 [`crate::dial`] 使用。
#[derive(Clone)]
pub struct TlsClientConfig(pub(crate) Arc<ClientConfig>);

impl TlsServerConfig {
    /// 接受 `rustls` 原生支持的 TLS 1.2/1.3 全范围，使用常规的基于票据的
    /// 会话恢复。
    pub fn default(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, rustls::Error> {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)?;
        Ok(TlsServerConfig(Arc::new(config)))
    }

    /// 只钉死 TLS 1.3 并禁用基于票据的会话恢复——即便底层早已不可能回落到
    /// SSL，仍然保留的那道更严格的开关。
    pub fn strict(
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, rustls::Error> {
        let mut config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)?;
        config.send_tls13_tickets = 0;
        Ok(TlsServerConfig(Arc::new(config)))
    }
}

impl TlsClientConfig {
    pub fn default(roots: RootCertStore) -> Self {
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsClientConfig(Arc::new(config))
    }

    pub fn strict(roots: RootCertStore) -> Self {
        let mut config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.resumption = Resumption::disabled();
        TlsClientConfig(Arc::new(config))
    }
}
