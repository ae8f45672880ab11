//! 规范化 (Canonicalization)
//!
//! 每种节点提供一个纯函数：根据节点与操作数的静态事实给出
//! “不变 / 替换 / 删除” 的决定。驱动器反复应用直到不动点，
//! 结果与应用顺序无关。
//!
//! 规则族：
//! 1. 常量折叠
//! 2. 交换律运算的规范操作数顺序（常量在右）
//! 3. 恒等式化简（x-x、x|x、移位 0、双重取反）
//! 4. 固定节点：零长度拷贝删除、常量守卫消解

mod arith;
mod fixed;

pub use arith::{fold_binary, fold_compare, fold_unary};

use tracing::{debug, trace};

use crate::middle::core::error::{IrError, IrResult};
use crate::middle::core::graph::{Graph, Inputs, NodeId};
use crate::middle::core::node::{DeoptAction, DeoptReason, NodeKind};

/// 单个节点的规范化结果
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    /// 已是规范形式
    Unchanged,
    /// 用已有节点替换所有使用
    Replace(NodeId),
    /// 构造（或复用）等价节点并替换所有使用
    Rebuild(NodeKind, Inputs),
    /// 从控制链中删除固定节点
    Delete,
    /// 固定节点必然失败，改为无条件去优化
    Deoptimize {
        reason: DeoptReason,
        action: DeoptAction,
    },
    /// 原地细化固定节点的载荷
    Refine(NodeKind),
}

/// 计算节点的规范形式，不修改图
pub fn canonical(
    graph: &Graph,
    id: NodeId,
) -> Canonical {
    match graph[id].kind() {
        NodeKind::Binary { op, kind } => arith::binary(graph, id, *op, *kind),
        NodeKind::Unary { op, kind } => arith::unary(graph, id, *op, *kind),
        NodeKind::Compare { op, kind } => arith::compare(graph, id, *op, *kind),
        NodeKind::IsNull => arith::is_null(graph, id),
        NodeKind::ArrayCopy(_) | NodeKind::DelayedCopy(_) => fixed::copy(graph, id),
        NodeKind::FixedGuard {
            reason,
            action,
            negated,
        } => fixed::guard(graph, id, *reason, *action, *negated),
        _ => Canonical::Unchanged,
    }
}

/// 规范化配置
#[derive(Debug, Clone)]
pub struct CanonicalizerConfig {
    /// 最多扫描轮数，超过视为不收敛
    pub max_rounds: usize,
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        Self { max_rounds: 64 }
    }
}

/// 规范化统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CanonicalStats {
    /// 扫描轮数
    pub rounds: usize,
    /// 浮动节点被替换的次数
    pub replaced: usize,
    /// 删除的固定节点数
    pub removed_fixed: usize,
    /// 其中长度为零的拷贝
    pub removed_copies: usize,
    /// 改为去优化的守卫数
    pub deoptimized: usize,
    /// 原地细化的节点数
    pub refined: usize,
}

impl CanonicalStats {
    /// 改动总数
    pub fn changes(&self) -> usize {
        self.replaced + self.removed_fixed + self.deoptimized + self.refined
    }
}

/// 不动点驱动器
#[derive(Debug, Default)]
pub struct Canonicalizer {
    config: CanonicalizerConfig,
    stats: CanonicalStats,
}

impl Canonicalizer {
    pub fn new(config: CanonicalizerConfig) -> Self {
        Self {
            config,
            stats: CanonicalStats::default(),
        }
    }

    pub fn stats(&self) -> &CanonicalStats {
        &self.stats
    }

    /// 规范化整张图，返回本次的改动数
    ///
    /// 对已规范的图再次运行返回 0。
    pub fn run(
        &mut self,
        graph: &mut Graph,
    ) -> IrResult<usize> {
        let before = self.stats.changes();
        graph.remove_dead_floating();
        let mut rounds = 0;
        loop {
            if rounds >= self.config.max_rounds {
                return Err(IrError::Diverged(self.stats.changes() - before));
            }
            rounds += 1;
            let changed = self.round(graph)?;
            graph.remove_dead_floating();
            if changed == 0 {
                break;
            }
        }
        self.stats.rounds += rounds;
        let changes = self.stats.changes() - before;
        debug!(graph = %graph.name(), rounds, changes, "canonicalization finished");
        Ok(changes)
    }

    fn round(
        &mut self,
        graph: &mut Graph,
    ) -> IrResult<usize> {
        let mut changed = 0;
        for id in graph.live_ids() {
            let Some(node) = graph.get(id) else {
                continue;
            };
            // 无人使用的浮动节点稍后整体回收
            if !node.kind().is_fixed() && node.usages().is_empty() {
                continue;
            }
            let decision = canonical(graph, id);
            if decision != Canonical::Unchanged && self.apply(graph, id, decision)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn apply(
        &mut self,
        graph: &mut Graph,
        id: NodeId,
        decision: Canonical,
    ) -> IrResult<bool> {
        match decision {
            Canonical::Unchanged => return Ok(false),
            Canonical::Replace(replacement) => {
                trace!(node = %id, replacement = %replacement, "replace");
                graph.replace_at_usages(id, replacement);
                self.stats.replaced += 1;
            }
            Canonical::Rebuild(kind, inputs) => {
                let replacement = graph.unique(kind, &inputs);
                if replacement == id {
                    return Ok(false);
                }
                trace!(node = %id, replacement = %replacement, kind = %graph[replacement].kind(), "rebuild");
                graph.replace_at_usages(id, replacement);
                self.stats.replaced += 1;
            }
            Canonical::Delete => {
                let is_copy = graph[id].kind().as_copy().is_some();
                trace!(node = %id, kind = %graph[id].kind(), "delete fixed node");
                graph.remove_fixed(id)?;
                self.stats.removed_fixed += 1;
                if is_copy {
                    self.stats.removed_copies += 1;
                }
            }
            Canonical::Deoptimize { reason, action } => {
                trace!(node = %id, ?reason, "guard always fails");
                graph.replace_with_deopt(id, reason, action)?;
                self.stats.deoptimized += 1;
            }
            Canonical::Refine(kind) => {
                trace!(node = %id, kind = %kind, "refine");
                let throws = kind.may_throw();
                graph.replace_kind(id, kind)?;
                if !throws {
                    if let Some(handler) = graph[id].exception_edge() {
                        graph.kill_cfg(handler);
                    }
                }
                self.stats.refined += 1;
            }
        }
        Ok(true)
    }
}

/// 以默认配置规范化
pub fn canonicalize(graph: &mut Graph) -> IrResult<usize> {
    Canonicalizer::default().run(graph)
}
