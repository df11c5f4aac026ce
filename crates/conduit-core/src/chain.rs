//! # Chain：节点图与方向性转发内核
//!
//! ## 核心意图（Why）
//! - 一条连接（一个客户端套接字及其下游所有端点/协议状态机）需要一个共享的、
//!   线程安全的注册表，支持节点互相转发数据包与关闭通知，而不必互相持有引用；
//! - 通过 `NodeId` 间接寻址，节点可以在被其对端转发调用的同时安全地从图中摘除。
//!
//! ## 架构定位（Where）
//! - 每个入站连接拥有自己独立的 `Chain`；不同 `Chain` 之间不共享任何状态，
//!   天然按连接分片，避免单一全局锁成为热点。
//! - `conduit-transport-tcp` 的端点节点、`conduit-socks` 的协议状态机、以及
//!   `conduit-core::processor` 的透传/变换节点，都以 `NodeHandlers` 的身份挂入。
//!
//! ## 行为契约（What）
//! - `forward_up`/`forward_down` 按连接顺序逐个分发给对应方向的对端；
//! - `propagate_close` 先通知对端再把本节点从图中摘除，不留悬挂边。
//!
//! ## 风险提示（Trade-offs）
//! - 所有分发都在持有锁的情况下同步执行，节点处理函数不得 `.await`；
//!   真正的异步工作（拨号、DNS 解析）必须在处理函数之外 `tokio::spawn` 完成，
//!   再通过 `Chain` 的公开方法回调进来。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::direction::Direction;
use crate::error::{Error, Result};

/// 指向某条 `Chain` 内部竞技场中一个节点的非持有句柄，以稳定索引寻址。
///
/// `NodeId` 不会跨 `Chain` 复用，脱离铸造它的那条 `Chain` 毫无意义。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// 任何能挂入 `Chain` 的节点都要实现的接口：端点（入站/出站套接字）、
/// 协议前端/后端状态机，以及纯透传处理器。
///
/// # 教案式注释
/// - **意图 (Why)**：默认方法体原样转发数据包/关闭通知到对应方向的每个对端，
///   这恰好就是透传处理器的行为；
/// - **契约 (What)**：前端/后端应当覆盖这些方法，自行驱动状态机，并在决定某个
///   数据包可以继续前进时显式调用 `chain.forward_up`/`chain.forward_down`/
///   `chain.propagate_close`；
/// - **风险 (Trade-offs)**：方法体运行在 `Chain` 持锁的同步路径上，覆盖实现
///   不得阻塞或 `.await`，否则会卡住整条连接的分发。
pub trait NodeHandlers: Send {
    fn on_packet_up(&mut self, chain: &Chain, id: NodeId, data: Bytes) {
        let _ = chain.forward_up(id, data);
    }

    fn on_packet_down(&mut self, chain: &Chain, id: NodeId, data: Bytes) {
        let _ = chain.forward_down(id, data);
    }

    fn on_close(&mut self, chain: &Chain, id: NodeId, direction: Direction) {
        let _ = chain.propagate_close(id, direction);
    }
}

struct Slot {
    handlers: Option<Box<dyn NodeHandlers>>,
    upstream: Vec<NodeId>,
    downstream: Vec<NodeId>,
}

impl Slot {
    fn new(handlers: Box<dyn NodeHandlers>) -> Self {
        Slot {
            handlers: Some(handlers),
            upstream: Vec::new(),
            downstream: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ChainInner {
    slots: HashMap<usize, Slot>,
    next_id: usize,
}

impl ChainInner {
    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots.get(&id.0).ok_or(Error::UnknownNode { id })
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot> {
        self.slots.get_mut(&id.0).ok_or(Error::UnknownNode { id })
    }
}

/// `Chain` 在单把锁之后持有节点竞技场，被连接内的读写任务共享。
///
/// # 教案式注释
/// - **意图 (Why)**：让运行在不同 Tokio 任务里的端点/状态机能够互相转发数据，
///   而不必直接持有对方的引用或关心对方的生命周期；
/// - **逻辑 (How)**：进入图的每一次分发（`forward_up`、`forward_down`、
///   `propagate_close`，以及它们触达的每个协议状态机调用）都在持锁状态下同步
///   执行。节点在处理函数运行前被取出槽位，运行后放回，因此一个回调进 `Chain`
///   去联系自己对端的处理函数不会重复借用自己的槽位；
/// - **风险 (Trade-offs)**：异步工作（拨号、DNS 解析）绝不能在持锁路径上发生，
///   必须 `tokio::spawn` 到图外，再用 `Chain` 的公开方法回调进来。
#[derive(Clone)]
pub struct Chain {
    inner: Arc<Mutex<ChainInner>>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Chain {
            inner: Arc::new(Mutex::new(ChainInner::default())),
        }
    }

    /// 向竞技场添加一个节点，初始时两个方向上都没有对端。
    pub fn insert(&self, handlers: Box<dyn NodeHandlers>) -> NodeId {
        let mut inner = self.inner.lock().unwrap();
        let id = NodeId(inner.next_id);
        inner.next_id += 1;
        inner.slots.insert(id.0, Slot::new(handlers));
        id
    }

    /// 把 `upstream` 链接到 `downstream`：`downstream` 被追加进
    /// `upstream` 的下游对端列表，`upstream` 也被追加进 `downstream` 的上游
    /// 对端列表——一次调用在两个方向上各建一条边。
    ///
    /// - **前置条件**：`upstream`、`downstream` 都必须仍在竞技场中；
    /// - **后置条件**：重复调用同一对节点是幂等的，不会产生重复边。
    pub fn connect(&self, upstream: NodeId, downstream: NodeId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.slots.contains_key(&upstream.0) {
            return Err(Error::UnknownNode { id: upstream });
        }
        if !inner.slots.contains_key(&downstream.0) {
            return Err(Error::UnknownNode { id: downstream });
        }
        let up_slot = inner.slot_mut(upstream)?;
        if !up_slot.downstream.contains(&downstream) {
            up_slot.downstream.push(downstream);
        }
        let down_slot = inner.slot_mut(downstream)?;
        if !down_slot.upstream.contains(&upstream) {
            down_slot.upstream.push(upstream);
        }
        Ok(())
    }

    /// 把节点从竞技场移除，并在两个方向上从每个对端的列表中摘掉它，确保不
    /// 留下悬挂边。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：不会通知这些对端——`propagate_close` 会先完成通知
    ///   再调用本函数；
    /// - **后置条件**：`id` 之后不再出现在任何对端的 `upstream`/`downstream`
    ///   列表中。
    pub fn remove(&self, id: NodeId) {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.slots.remove(&id.0) else {
            return;
        };
        for peer in slot.upstream {
            if let Some(peer_slot) = inner.slots.get_mut(&peer.0) {
                peer_slot.downstream.retain(|&p| p != id);
            }
        }
        for peer in slot.downstream {
            if let Some(peer_slot) = inner.slots.get_mut(&peer.0) {
                peer_slot.upstream.retain(|&p| p != id);
            }
        }
    }

    /// 把节点从槽位中取出，在释放锁的情况下对它运行 `f`，然后放回去。
    ///
    /// - **错误语义**：`id` 没有对应节点（已被移除，或从未存在），或者一次
    ///   重入分发已经把该节点借出在外，都返回 `UnknownNode`。
    fn dispatch(&self, id: NodeId, f: impl FnOnce(&mut dyn NodeHandlers, &Chain, NodeId)) -> Result<()> {
        let taken = {
            let mut inner = self.inner.lock().unwrap();
            inner.slot_mut(id)?.handlers.take()
        };
        let mut node = taken.ok_or(Error::UnknownNode { id })?;
        f(node.as_mut(), self, id);
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.slots.get_mut(&id.0) {
            slot.handlers = Some(node);
        }
        Ok(())
    }

    /// 按连接顺序把 `data` 发给 `from` 的每一个上游对端。
    pub fn forward_up(&self, from: NodeId, data: Bytes) -> Result<()> {
        let peers = {
            let inner = self.inner.lock().unwrap();
            inner.slot(from)?.upstream.clone()
        };
        for peer in peers {
            self.dispatch(peer, |h, chain, id| h.on_packet_up(chain, id, data.clone()))?;
        }
        Ok(())
    }

    /// 按连接顺序把 `data` 发给 `from` 的每一个下游对端。
    pub fn forward_down(&self, from: NodeId, data: Bytes) -> Result<()> {
        let peers = {
            let inner = self.inner.lock().unwrap();
            inner.slot(from)?.downstream.clone()
        };
        for peer in peers {
            self.dispatch(peer, |h, chain, id| h.on_packet_down(chain, id, data.clone()))?;
        }
        Ok(())
    }

    /// 通知 `from` 在 `direction` 方向上的每个对端：`from` 已经关闭，然后把
    /// `from` 从竞技场中移除。
    ///
    /// - **前置条件**：`direction` 一旦选定就不会在传播过程中翻转，保持关闭
    ///   语义与触发方向一致。
    pub fn propagate_close(&self, from: NodeId, direction: Direction) -> Result<()> {
        let peers = {
            let inner = self.inner.lock().unwrap();
            let slot = inner.slot(from)?;
            match direction {
                Direction::Up => slot.upstream.clone(),
                Direction::Down => slot.downstream.clone(),
            }
        };
        for peer in peers {
            self.dispatch(peer, |h, chain, id| h.on_close(chain, id, direction))?;
        }
        self.remove(from);
        Ok(())
    }

    /// 返回 `id` 当前的上游对端列表。
    pub fn upstream_of(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.slot(id)?.upstream.clone())
    }

    /// 返回 `id` 当前的下游对端列表。
    pub fn downstream_of(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.slot(id)?.downstream.clone())
    }

    /// `id` 是否仍在竞技场中。
    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.lock().unwrap().slots.contains_key(&id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        seen: Arc<Mutex<Vec<Bytes>>>,
    }

    impl NodeHandlers for Recorder {
        fn on_packet_down(&mut self, _chain: &Chain, _id: NodeId, data: Bytes) {
            self.seen.lock().unwrap().push(data);
        }
    }

    struct PassThrough;
    impl NodeHandlers for PassThrough {}

    #[test]
    fn connect_is_bidirectional() {
        let chain = Chain::new();
        let a = chain.insert(Box::new(PassThrough));
        let b = chain.insert(Box::new(PassThrough));
        chain.connect(a, b).unwrap();

        assert_eq!(chain.downstream_of(a).unwrap(), vec![b]);
        assert_eq!(chain.upstream_of(b).unwrap(), vec![a]);
    }

    #[test]
    fn connect_does_not_duplicate_links() {
        let chain = Chain::new();
        let a = chain.insert(Box::new(PassThrough));
        let b = chain.insert(Box::new(PassThrough));
        chain.connect(a, b).unwrap();
        chain.connect(a, b).unwrap();

        assert_eq!(chain.downstream_of(a).unwrap(), vec![b]);
        assert_eq!(chain.upstream_of(b).unwrap(), vec![a]);
    }

    #[test]
    fn forward_down_reaches_every_downstream_peer_in_order() {
        let chain = Chain::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = chain.insert(Box::new(PassThrough));
        let sink = chain.insert(Box::new(Recorder { seen: seen.clone() }));
        chain.connect(source, sink).unwrap();

        chain.forward_down(source, Bytes::from_static(b"hello")).unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), [Bytes::from_static(b"hello")]);
    }

    #[test]
    fn propagate_close_removes_the_closing_node() {
        let chain = Chain::new();
        let a = chain.insert(Box::new(PassThrough));
        let b = chain.insert(Box::new(PassThrough));
        chain.connect(a, b).unwrap();

        chain.propagate_close(a, Direction::Down).unwrap();

        assert!(!chain.contains(a));
        assert!(chain.contains(b));
        assert!(chain.upstream_of(b).unwrap().is_empty(), "no dangling edge back to the removed node");
    }

    #[test]
    fn unknown_node_is_reported_not_panicked() {
        let chain = Chain::new();
        let ghost = {
            let id = chain.insert(Box::new(PassThrough));
            chain.remove(id);
            id
        };
        let err = chain.forward_down(ghost, Bytes::new()).unwrap_err();
        assert_eq!(err.code(), "conduit.core.unknown_node");
    }

    /// 处理函数会继续向下转发的节点，不应因为锁被取两次而在自己的槽位上死锁。
    #[test]
    fn dispatch_allows_reentrant_calls_into_other_nodes() {
        struct Forwarder(AtomicUsize);
        impl NodeHandlers for Forwarder {
            fn on_packet_down(&mut self, chain: &Chain, id: NodeId, data: Bytes) {
                self.0.fetch_add(1, Ordering::SeqCst);
                let _ = chain.forward_down(id, data);
            }
        }

        let chain = Chain::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = chain.insert(Box::new(PassThrough));
        let middle = chain.insert(Box::new(Forwarder(AtomicUsize::new(0))));
        let sink = chain.insert(Box::new(Recorder { seen: seen.clone() }));
        chain.connect(source, middle).unwrap();
        chain.connect(middle, sink).unwrap();

        chain.forward_down(source, Bytes::from_static(b"x")).unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), [Bytes::from_static(b"x")]);
    }
}
