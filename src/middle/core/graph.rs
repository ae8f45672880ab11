//! 图存储与变换原语
//!
//! 节点保存在以整数句柄寻址的 arena 中；边是句柄列表，
//! 使用边（usages）随每次修改增量维护，节点之间没有所有权指针。
//!
//! 提供的原语：
//! - 添加节点与值编号（相同的纯节点只保留一个）
//! - 在使用处替换节点
//! - 控制链上的插入、删除与拼接
//! - 删除不可达的控制流与无用的浮动节点

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Index;

use smallvec::SmallVec;
use tracing::trace;

use super::copy::OffsetFact;
use super::error::{IrError, IrResult};
use super::node::{Constant, DeoptAction, DeoptReason, NodeKind};
use super::stage::GuardsStage;
use super::types::{ObjectStamp, Stamp};

/// 节点句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(raw: u32) -> Self {
        NodeId(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// 输入列表
pub type Inputs = SmallVec<[NodeId; 6]>;

/// 图中的一个节点
#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    inputs: Inputs,
    /// 执行后的帧状态
    state_after: Option<NodeId>,
    /// 上一个写内存的节点（仅用于排序）
    memory: Option<NodeId>,
    next: Option<NodeId>,
    predecessor: Option<NodeId>,
    /// 异常后继
    exception_edge: Option<NodeId>,
    /// 使用本节点的节点，每条边一项
    usages: Vec<NodeId>,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn input(
        &self,
        index: usize,
    ) -> NodeId {
        self.inputs[index]
    }

    pub fn state_after(&self) -> Option<NodeId> {
        self.state_after
    }

    /// 内存链上的前驱
    pub fn last_memory_access(&self) -> Option<NodeId> {
        self.memory
    }

    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor
    }

    pub fn exception_edge(&self) -> Option<NodeId> {
        self.exception_edge
    }

    pub fn usages(&self) -> &[NodeId] {
        &self.usages
    }

    /// 所有数据边的目标：输入、帧状态、内存
    fn edge_targets(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs
            .iter()
            .copied()
            .chain(self.state_after)
            .chain(self.memory)
    }
}

type ValueKey = (NodeKind, Inputs);

/// IR 图
#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    nodes: Vec<Option<Node>>,
    start: NodeId,
    stage: GuardsStage,
    value_numbers: HashMap<ValueKey, NodeId>,
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(
        &self,
        id: NodeId,
    ) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => panic!("{} is not a live node in graph `{}`", id, self.name),
        }
    }
}

impl Graph {
    /// 创建只有 Start 节点的图
    pub fn new(name: &str) -> Self {
        let mut graph = Self {
            name: name.to_string(),
            nodes: Vec::new(),
            start: NodeId(0),
            stage: GuardsStage::default(),
            value_numbers: HashMap::new(),
        };
        graph.start = graph.add(NodeKind::Start, &[]);
        graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn stage(&self) -> GuardsStage {
        self.stage
    }

    /// 推进流水线阶段（不可回退）
    pub fn set_stage(
        &mut self,
        stage: GuardsStage,
    ) -> IrResult<()> {
        if stage < self.stage {
            return Err(IrError::StageRegression {
                from: self.stage,
                to: stage,
            });
        }
        trace!(graph = %self.name, from = %self.stage, to = %stage, "advance guards stage");
        self.stage = stage;
        Ok(())
    }

    pub fn get(
        &self,
        id: NodeId,
    ) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(|n| n.as_ref())
    }

    pub fn is_live(
        &self,
        id: NodeId,
    ) -> bool {
        self.get(id).is_some()
    }

    fn node_mut(
        &mut self,
        id: NodeId,
    ) -> &mut Node {
        match self.nodes.get_mut(id.index()).and_then(|n| n.as_mut()) {
            Some(node) => node,
            None => panic!("{} is not a live node", id),
        }
    }

    /// 存活节点个数
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// 按句柄顺序列出存活节点
    pub fn live_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    // ===== 添加 =====

    /// 添加节点（不做值编号，不接入控制链）
    pub fn add(
        &mut self,
        kind: NodeKind,
        inputs: &[NodeId],
    ) -> NodeId {
        debug_assert!(
            kind.input_count().is_none_or(|n| n == inputs.len()),
            "{} expects {:?} inputs, got {}",
            kind,
            kind.input_count(),
            inputs.len()
        );
        let id = NodeId(self.nodes.len() as u32);
        for input in inputs {
            self.node_mut(*input).usages.push(id);
        }
        self.nodes.push(Some(Node {
            kind,
            inputs: inputs.iter().copied().collect(),
            state_after: None,
            memory: None,
            next: None,
            predecessor: None,
            exception_edge: None,
            usages: Vec::new(),
        }));
        id
    }

    /// 添加节点；若已有等价的纯节点则复用
    pub fn unique(
        &mut self,
        kind: NodeKind,
        inputs: &[NodeId],
    ) -> NodeId {
        if !kind.is_value_numberable() {
            return self.add(kind, inputs);
        }
        let key: ValueKey = (kind, inputs.iter().copied().collect());
        if let Some(existing) = self.value_numbers.get(&key) {
            return *existing;
        }
        let id = self.add(key.0.clone(), inputs);
        self.value_numbers.insert(key, id);
        id
    }

    pub fn constant(
        &mut self,
        constant: Constant,
    ) -> NodeId {
        self.unique(NodeKind::Constant(constant), &[])
    }

    pub fn int(
        &mut self,
        value: i32,
    ) -> NodeId {
        self.constant(Constant::Int(value))
    }

    pub fn parameter(
        &mut self,
        index: u32,
        stamp: Stamp,
    ) -> NodeId {
        self.add(NodeKind::Parameter { index, stamp }, &[])
    }

    pub fn frame_state(
        &mut self,
        bci: i32,
    ) -> NodeId {
        self.add(NodeKind::FrameState { bci }, &[])
    }

    /// 把固定节点追加到主控制链末尾，写内存的节点自动接入内存链
    pub fn append(
        &mut self,
        kind: NodeKind,
        inputs: &[NodeId],
    ) -> NodeId {
        let chain = self.fixed_chain();
        let tail = chain.last().copied().unwrap_or(self.start);
        debug_assert!(
            !self[tail].kind.is_control_sink(),
            "cannot append after control sink {}",
            tail
        );
        let memory = if kind.is_memory_kill() {
            chain
                .iter()
                .rev()
                .find(|id| self[**id].kind.is_memory_kill())
                .copied()
        } else {
            None
        };
        let id = self.add(kind, inputs);
        self.link(tail, id);
        if memory.is_some() {
            self.set_memory(id, memory);
        }
        id
    }

    /// 在 `pred` 之后插入新的固定节点
    pub fn add_fixed_after(
        &mut self,
        pred: NodeId,
        kind: NodeKind,
        inputs: &[NodeId],
    ) -> NodeId {
        let id = self.add(kind, inputs);
        let next = self[pred].next;
        self.link(pred, id);
        if let Some(next) = next {
            self.link(id, next);
        }
        id
    }

    /// 为固定节点挂上异常处理入口
    pub fn add_exception_handler(
        &mut self,
        node: NodeId,
    ) -> NodeId {
        let handler = self.add(NodeKind::ExceptionHandler, &[]);
        self.node_mut(node).exception_edge = Some(handler);
        self.node_mut(handler).predecessor = Some(node);
        handler
    }

    /// 把 `from` 的异常后继移交给 `to`
    pub fn move_exception_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
    ) {
        if let Some(handler) = self.node_mut(from).exception_edge.take() {
            self.node_mut(to).exception_edge = Some(handler);
            self.node_mut(handler).predecessor = Some(to);
        }
    }

    fn link(
        &mut self,
        pred: NodeId,
        next: NodeId,
    ) {
        self.node_mut(pred).next = Some(next);
        self.node_mut(next).predecessor = Some(pred);
    }

    // ===== 边的修改 =====

    pub fn set_state_after(
        &mut self,
        id: NodeId,
        state: Option<NodeId>,
    ) {
        if let Some(old) = self[id].state_after {
            self.remove_usage(old, id);
        }
        if let Some(new) = state {
            self.node_mut(new).usages.push(id);
        }
        self.node_mut(id).state_after = state;
    }

    pub fn set_memory(
        &mut self,
        id: NodeId,
        memory: Option<NodeId>,
    ) {
        if let Some(old) = self[id].memory {
            self.remove_usage(old, id);
        }
        if let Some(new) = memory {
            self.node_mut(new).usages.push(id);
        }
        self.node_mut(id).memory = memory;
    }

    /// 原地替换固定节点的载荷，输入与边保持不变
    pub fn replace_kind(
        &mut self,
        id: NodeId,
        kind: NodeKind,
    ) -> IrResult<()> {
        if !self[id].kind.is_fixed() || !kind.is_fixed() {
            return Err(IrError::NotFixed(id));
        }
        if let Some(expected) = kind.input_count() {
            let found = self[id].inputs.len();
            if expected != found {
                return Err(IrError::InputCount {
                    node: id,
                    expected,
                    found,
                });
            }
        }
        self.node_mut(id).kind = kind;
        Ok(())
    }

    fn remove_usage(
        &mut self,
        target: NodeId,
        user: NodeId,
    ) {
        if let Some(Some(node)) = self.nodes.get_mut(target.index()) {
            if let Some(pos) = node.usages.iter().position(|u| *u == user) {
                node.usages.swap_remove(pos);
            }
        }
    }

    fn unhash(
        &mut self,
        id: NodeId,
    ) {
        let node = &self[id];
        if node.kind.is_value_numberable() {
            let key: ValueKey = (node.kind.clone(), node.inputs.clone());
            if self.value_numbers.get(&key) == Some(&id) {
                self.value_numbers.remove(&key);
            }
        }
    }

    /// 重新登记值编号；若已有等价节点则返回它
    fn rehash(
        &mut self,
        id: NodeId,
    ) -> Option<NodeId> {
        let node = &self[id];
        if !node.kind.is_value_numberable() {
            return None;
        }
        let key: ValueKey = (node.kind.clone(), node.inputs.clone());
        match self.value_numbers.get(&key) {
            Some(existing) if *existing != id => Some(*existing),
            Some(_) => None,
            None => {
                self.value_numbers.insert(key, id);
                None
            }
        }
    }

    /// 把所有对 `old` 的使用改为使用 `new`
    ///
    /// 修改后若某个使用者与已有节点等价，则继续合并；被合并掉的节点
    /// 留给 `remove_dead_floating` 清理。
    pub fn replace_at_usages(
        &mut self,
        old: NodeId,
        new: NodeId,
    ) {
        let mut pending = vec![(old, new)];
        while let Some((old, new)) = pending.pop() {
            if old == new || !self.is_live(old) || !self.is_live(new) {
                continue;
            }
            let users = std::mem::take(&mut self.node_mut(old).usages);
            let mut seen = HashSet::new();
            for user in users {
                if !seen.insert(user) || !self.is_live(user) {
                    continue;
                }
                self.unhash(user);
                let node = self.node_mut(user);
                let mut edges = 0;
                for input in node.inputs.iter_mut() {
                    if *input == old {
                        *input = new;
                        edges += 1;
                    }
                }
                if node.state_after == Some(old) {
                    node.state_after = Some(new);
                    edges += 1;
                }
                if node.memory == Some(old) {
                    node.memory = Some(new);
                    edges += 1;
                }
                for _ in 0..edges {
                    self.node_mut(new).usages.push(user);
                }
                if let Some(existing) = self.rehash(user) {
                    pending.push((user, existing));
                }
            }
        }
    }

    /// 删除节点并断开它的所有数据边
    ///
    /// 控制链由调用者先行断开。
    pub fn delete(
        &mut self,
        id: NodeId,
    ) {
        if !self.is_live(id) {
            return;
        }
        self.unhash(id);
        let targets: Vec<NodeId> = self[id].edge_targets().collect();
        for target in targets {
            self.remove_usage(target, id);
        }
        trace!(node = %id, kind = %self[id].kind, "delete node");
        self.nodes[id.index()] = None;
    }

    // ===== 控制流变换 =====

    /// 把固定节点从控制链中摘除
    ///
    /// 内存使用者改为直接连到它的内存前驱，异常后继整体删除。
    pub fn remove_fixed(
        &mut self,
        id: NodeId,
    ) -> IrResult<()> {
        if !self.is_live(id) {
            return Err(IrError::DeadNode(id));
        }
        if !self[id].kind.is_fixed() || id == self.start {
            return Err(IrError::NotFixed(id));
        }
        if let Some(handler) = self[id].exception_edge {
            self.kill_cfg(handler);
        }
        let pred = self[id].predecessor;
        let next = self[id].next;
        match (pred, next) {
            (Some(pred), Some(next)) => self.link(pred, next),
            (Some(pred), None) => self.node_mut(pred).next = None,
            (None, Some(next)) => self.node_mut(next).predecessor = None,
            (None, None) => {}
        }
        let memory = self[id].memory;
        self.redirect_memory_users(id, memory);
        self.delete(id);
        Ok(())
    }

    fn redirect_memory_users(
        &mut self,
        id: NodeId,
        memory: Option<NodeId>,
    ) {
        let users: Vec<NodeId> = self[id]
            .usages
            .iter()
            .copied()
            .filter(|u| self.get(*u).is_some_and(|n| n.memory == Some(id)))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for user in users {
            self.set_memory(user, memory);
        }
    }

    /// 用一段新的固定节点链替换 `old`
    ///
    /// `chain` 中的节点必须已经添加但尚未接入控制链。链中写内存的节点
    /// 依次串到 `old` 的内存前驱之后，`old` 的内存使用者改接到链中最后
    /// 一个写内存的节点。
    pub fn splice_fixed(
        &mut self,
        old: NodeId,
        chain: &[NodeId],
    ) -> IrResult<()> {
        if !self.is_live(old) {
            return Err(IrError::DeadNode(old));
        }
        if !self[old].kind.is_fixed() {
            return Err(IrError::NotFixed(old));
        }
        let Some((&first, _)) = chain.split_first() else {
            return self.remove_fixed(old);
        };
        for id in chain {
            if !self[*id].kind.is_fixed() {
                return Err(IrError::NotFixed(*id));
            }
        }
        if let Some(handler) = self[old].exception_edge {
            self.node_mut(old).exception_edge = None;
            self.kill_cfg(handler);
        }

        let pred = self[old].predecessor;
        let next = self[old].next;
        self.node_mut(old).next = None;
        self.node_mut(old).predecessor = None;
        if let Some(pred) = pred {
            self.link(pred, first);
        }
        for pair in chain.windows(2) {
            self.link(pair[0], pair[1]);
        }
        let last = chain[chain.len() - 1];
        if let Some(next) = next {
            if self[last].kind.is_control_sink() {
                self.kill_cfg(next);
            } else {
                self.link(last, next);
            }
        }

        let mut memory = self[old].memory;
        for id in chain {
            if self[*id].kind.is_memory_kill() {
                self.set_memory(*id, memory);
                memory = Some(*id);
            }
        }
        self.redirect_memory_users(old, memory);

        let remaining: Vec<NodeId> = self[old]
            .usages
            .iter()
            .copied()
            .filter(|u| self.get(*u).is_some_and(|n| n.memory != Some(old)))
            .collect();
        if !remaining.is_empty() {
            return Err(IrError::Malformed(format!(
                "{} still has value usages {:?} after splice",
                old, remaining
            )));
        }
        self.delete(old);
        Ok(())
    }

    /// 用无条件去优化替换固定节点，其后的控制流全部删除
    pub fn replace_with_deopt(
        &mut self,
        id: NodeId,
        reason: DeoptReason,
        action: DeoptAction,
    ) -> IrResult<NodeId> {
        let deopt = self.add(NodeKind::Deopt { reason, action }, &[]);
        let state = self[id].state_after;
        self.set_state_after(deopt, state);
        self.splice_fixed(id, &[deopt])?;
        Ok(deopt)
    }

    /// 删除从 `from` 起可达的全部控制流
    pub fn kill_cfg(
        &mut self,
        from: NodeId,
    ) {
        if !self.is_live(from) {
            return;
        }
        if let Some(pred) = self[from].predecessor {
            if let Some(node) = self.nodes[pred.index()].as_mut() {
                if node.next == Some(from) {
                    node.next = None;
                }
                if node.exception_edge == Some(from) {
                    node.exception_edge = None;
                }
            }
        }

        let mut dead = Vec::new();
        let mut seen = HashSet::new();
        let mut work = vec![from];
        while let Some(id) = work.pop() {
            if !seen.insert(id) || !self.is_live(id) {
                continue;
            }
            dead.push(id);
            work.extend(self[id].next);
            work.extend(self[id].exception_edge);
        }

        for id in &dead {
            let memory = self[*id].memory;
            let outside: Vec<NodeId> = self[*id]
                .usages
                .iter()
                .copied()
                .filter(|u| !seen.contains(u) && self.get(*u).is_some_and(|n| n.memory == Some(*id)))
                .collect();
            for user in outside {
                self.set_memory(user, memory);
            }
        }
        for id in &dead {
            self.set_memory(*id, None);
        }
        for id in dead {
            trace!(node = %id, "kill unreachable control flow");
            self.delete(id);
        }
        self.remove_dead_floating();
    }

    /// 删除没有使用者的浮动节点（参数除外）
    pub fn remove_dead_floating(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let dead: Vec<NodeId> = self
                .live_ids()
                .into_iter()
                .filter(|id| {
                    let node = &self[*id];
                    !node.kind.is_fixed()
                        && node.usages.is_empty()
                        && !matches!(node.kind, NodeKind::Parameter { .. })
                })
                .collect();
            if dead.is_empty() {
                return removed;
            }
            removed += dead.len();
            for id in dead {
                self.delete(id);
            }
        }
    }

    // ===== 查询 =====

    /// 主控制链（从 Start 沿 next）
    pub fn fixed_chain(&self) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(self.start);
        while let Some(id) = current {
            chain.push(id);
            current = self[id].next;
        }
        chain
    }

    /// 从 `id` 沿内存前驱回溯的链
    pub fn memory_chain(
        &self,
        id: NodeId,
    ) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self[id].memory;
        while let Some(prev) = current {
            chain.push(prev);
            current = self[prev].memory;
        }
        chain
    }

    pub fn constant_of(
        &self,
        id: NodeId,
    ) -> Option<Constant> {
        self.get(id).and_then(|n| n.kind.as_constant()).copied()
    }

    pub fn int_constant(
        &self,
        id: NodeId,
    ) -> Option<i32> {
        match self.constant_of(id) {
            Some(Constant::Int(v)) => Some(v),
            _ => None,
        }
    }

    /// 对象值的静态类型事实
    pub fn object_stamp(
        &self,
        id: NodeId,
    ) -> ObjectStamp {
        match self.get(id).map(|n| &n.kind) {
            Some(NodeKind::Parameter {
                stamp: Stamp::Object(stamp),
                ..
            }) => stamp.clone(),
            _ => ObjectStamp::unknown(),
        }
    }

    pub fn offset_fact(
        &self,
        id: NodeId,
    ) -> OffsetFact {
        OffsetFact {
            node: id,
            constant: self.int_constant(id),
        }
    }

    /// 检查边与使用列表的一致性
    pub fn verify(&self) -> IrResult<()> {
        for id in self.live_ids() {
            let node = &self[id];
            for target in node.edge_targets() {
                let Some(target_node) = self.get(target) else {
                    return Err(IrError::Malformed(format!("{} uses dead node {}", id, target)));
                };
                let edges = node.edge_targets().filter(|t| *t == target).count();
                let recorded = target_node.usages.iter().filter(|u| **u == id).count();
                if edges != recorded {
                    return Err(IrError::Malformed(format!(
                        "{} has {} edges to {} but {} usages recorded",
                        id, edges, target, recorded
                    )));
                }
            }
            if let Some(next) = node.next {
                if self.get(next).and_then(|n| n.predecessor) != Some(id) {
                    return Err(IrError::Malformed(format!(
                        "{}.next = {} but predecessor does not match",
                        id, next
                    )));
                }
            }
            if let Some(expected) = node.kind.input_count() {
                if expected != node.inputs.len() {
                    return Err(IrError::InputCount {
                        node: id,
                        expected,
                        found: node.inputs.len(),
                    });
                }
            }
        }
        for ((kind, inputs), id) in &self.value_numbers {
            match self.get(*id) {
                Some(node) if &node.kind == kind && &node.inputs == inputs => {}
                _ => {
                    return Err(IrError::Malformed(format!(
                        "stale value number entry for {}",
                        id
                    )))
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(f, "graph {} [{}]", self.name, self.stage)?;
        for id in self.live_ids() {
            let node = &self[id];
            write!(f, "  {} = {}", id, node.kind)?;
            if !node.inputs.is_empty() {
                let inputs: Vec<String> = node.inputs.iter().map(|i| i.to_string()).collect();
                write!(f, " ({})", inputs.join(", "))?;
            }
            if let Some(next) = node.next {
                write!(f, " -> {}", next)?;
            }
            if let Some(memory) = node.memory {
                write!(f, " mem {}", memory)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
