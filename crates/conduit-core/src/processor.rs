//! # Processor：无套接字的观察/变换节点
//!
//! ## 核心意图（Why）
//! - 入站与出站端点之间有时需要一个既不拨号也不监听、只负责旁观或改写字节流
//!   的中间节点（审计、限速、协议改写……），却不想为每种需求手写一个空结构体。
//!
//! ## 行为契约（What）
//! - `PassThrough`：什么都不做，直接复用 `NodeHandlers` 的默认转发语义；
//! - `Transform`：对每个方向的每个数据包跑一次闭包，`None` 表示丢弃（过滤器），
//!   `Some(bytes)` 表示放行（可能已被改写）。

use bytes::Bytes;

use crate::chain::{Chain, NodeHandlers, NodeId};
use crate::direction::Direction;

/// 纯透传节点：复用默认方法体原样转发，省去调用方自定义空结构体的麻烦。
pub struct PassThrough;

impl NodeHandlers for PassThrough {}

/// 对两个方向的每个数据包都运行 `transform` 的处理器。
pub struct Transform<F> {
    transform: F,
}

impl<F> Transform<F>
where
    F: FnMut(Direction, Bytes) -> Option<Bytes> + Send + 'static,
{
    pub fn new(transform: F) -> Self {
        Transform { transform }
    }
}

impl<F> NodeHandlers for Transform<F>
where
    F: FnMut(Direction, Bytes) -> Option<Bytes> + Send + 'static,
{
    fn on_packet_up(&mut self, chain: &Chain, id: NodeId, data: Bytes) {
        if let Some(data) = (self.transform)(Direction::Up, data) {
            let _ = chain.forward_up(id, data);
        }
    }

    fn on_packet_down(&mut self, chain: &Chain, id: NodeId, data: Bytes) {
        if let Some(data) = (self.transform)(Direction::Down, data) {
            let _ = chain.forward_down(id, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        seen: Arc<Mutex<Vec<Bytes>>>,
    }

    impl NodeHandlers for Recorder {
        fn on_packet_down(&mut self, _chain: &Chain, _id: NodeId, data: Bytes) {
            self.seen.lock().unwrap().push(data);
        }
    }

    #[test]
    fn pass_through_forwards_unchanged() {
        let chain = Chain::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = chain.insert(Box::new(PassThrough));
        let sink = chain.insert(Box::new(Recorder { seen: seen.clone() }));
        chain.connect(source, sink).unwrap();

        chain.forward_down(source, Bytes::from_static(b"hi")).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), [Bytes::from_static(b"hi")]);
    }

    #[test]
    fn filter_drops_packets_that_transform_to_none() {
        let chain = Chain::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = chain.insert(Box::new(PassThrough));
        let filter = chain.insert(Box::new(Transform::new(|_dir, _data| None)));
        let sink = chain.insert(Box::new(Recorder { seen: seen.clone() }));
        chain.connect(source, filter).unwrap();
        chain.connect(filter, sink).unwrap();

        chain.forward_down(source, Bytes::from_static(b"hi")).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn mutator_rewrites_and_forwards() {
        let chain = Chain::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = chain.insert(Box::new(PassThrough));
        let mutator = chain.insert(Box::new(Transform::new(|_dir, _data| Some(Bytes::from_static(b"rewritten")))));
        let sink = chain.insert(Box::new(Recorder { seen: seen.clone() }));
        chain.connect(source, mutator).unwrap();
        chain.connect(mutator, sink).unwrap();

        chain.forward_down(source, Bytes::from_static(b"hi")).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), [Bytes::from_static(b"rewritten")]);
    }
}
