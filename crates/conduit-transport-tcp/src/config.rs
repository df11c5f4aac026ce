use std::net::SocketAddr;
use std::time::Duration;

/// 监听端口的配置。
///
/// # 教案式注释
/// - **意图 (Why)**：以 Builder 风格的 `with_*` 方法叠加配置，不在此处解析
///   环境变量或配置文件，那是嵌入本 crate 的上层的职责；
/// - **契约 (What)**：纯数据结构，可 `Default`，字段均为公开只读。
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    pub backlog: i32,
    pub read_buffer_size: usize,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        ListenerConfig {
            bind_addr,
            backlog: 1024,
            read_buffer_size: 16 * 1024,
        }
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}

/// 拨号出站连接的配置。
#[derive(Clone, Debug)]
pub struct OutboundConfig {
    pub read_buffer_size: usize,
    pub connect_timeout: Option<Duration>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        OutboundConfig {
            read_buffer_size: 16 * 1024,
            connect_timeout: None,
        }
    }
}

impl OutboundConfig {
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}
