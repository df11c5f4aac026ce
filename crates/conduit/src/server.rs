//! # ProxyServer：内嵌式监听 + 逐连接装配
//!
//! ## 核心意图（Why）
//! - 对外暴露一个最小的嵌入 API：给定一个前端工厂，构造出一个监听器；
//!   每个被接受的连接各自拥有独立的链路。
//!
//! ## 架构定位（Where）
//! - 每个连接得到一个 `Inbound` 节点绑定到套接字，以及工厂产出的一个前端
//!   实例，挂在它的下游；自定义请求处理的方式是替换前端自身的策略钩子，
//!   外观层对工厂产出的具体 `NodeHandlers` 类型保持中立。

use std::net::SocketAddr;
use std::sync::Arc;

use conduit_core::{Chain, NodeHandlers};
use conduit_transport_tcp::{Listener, ListenerConfig, ListenerHandle};
use tracing::warn;

use crate::error::Result;

/// 为每个被接受的连接构造一个前端节点，通常包一个
/// `conduit_socks::Socks4FrontEnd`/`Socks5FrontEnd` 的构造函数，非 SOCKS
/// 场景下也可以是一个纯粹的透传处理器。
pub type FrontEndFactory = Arc<dyn Fn() -> Box<dyn NodeHandlers> + Send + Sync>;

/// 一个正在运行的监听器，加上它逐连接的装配策略。
pub struct ProxyServer {
    handle: ListenerHandle,
    local_addr: SocketAddr,
}

impl ProxyServer {
    /// 绑定 `config.bind_addr` 并开始接受连接。每个被接受的连接都按
    /// `inbound.connect(front_end)` 的方式装配，其中 `front_end` 由
    /// `front_end_factory` 现场构造。
    pub async fn bind(config: ListenerConfig, front_end_factory: FrontEndFactory) -> Result<Self> {
        let listener = Listener::bind(config.clone()).await?;
        let local_addr = listener.local_addr()?;
        let read_buffer_size = config.read_buffer_size;

        let handle = conduit_transport_tcp::serve(listener, move |stream, peer| {
            let front_end_factory = front_end_factory.clone();
            async move {
                let chain = Chain::new();
                let inbound = conduit_transport_tcp::spawn_inbound(&chain, stream, read_buffer_size);
                let front_end = chain.insert(front_end_factory());
                if chain.connect(inbound, front_end).is_err() {
                    warn!(?peer, "failed to wire inbound to front-end (chain already torn down)");
                }
            }
        });

        Ok(ProxyServer { handle, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 停止接受新连接，并等待所有在途链路的逐连接任务跑完。
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}
