//! 分阶段降级 (Staged Lowering)
//!
//! 把高层数组拷贝节点按策略展开为低层节点链。展开并不总是立即发生：
//! 某些片段必须等图推进到特定的流水线阶段。
//!
//! 节点状态：
//! - Created：已分类并包装为延迟节点，阶段未满足
//! - Eligible：`stage >= required_stage`
//! - Expanded：已被实例化的片段替换（终态）
//! - NonThrowing：分析证明异常边不可达（自迁移）
//! - Dead：长度被证明为零，由规范化删除（终态）
//!
//! 驱动器是一个不动点循环：规范化、分类、展开，直到一轮内没有变化。

pub mod classify;
pub mod error;
pub mod instantiate;
pub mod snippet;
pub mod stubs;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::middle::core::copy::{DelayedCopyNode, SnippetId};
use crate::middle::core::graph::{Graph, NodeId};
use crate::middle::core::kind::ArrayLayout;
use crate::middle::core::node::NodeKind;
use crate::middle::core::stage::GuardsStage;
use crate::middle::core::types::TypeUniverse;
use crate::middle::passes::canonical::{Canonicalizer, CanonicalizerConfig};

pub use classify::{classify, classify_node, Classification};
pub use error::{LoweringError, LoweringResult};
pub use instantiate::{instantiate, Expansion};
pub use snippet::{CacheStats, SnippetCache, SnippetTemplate, Transfer};
pub use stubs::{StubKey, StubRegistry};

/// 降级策略
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoweringPolicy {
    /// 是否允许把桩调用展开为显式循环
    pub expand_loops: bool,
    /// 常量长度不超过该值时也展开为循环（0 表示关闭）
    pub inline_loop_limit: u32,
    /// 规范化最多扫描轮数
    pub max_canonical_rounds: usize,
}

impl LoweringPolicy {
    /// 给定（可能未知的）常量长度，是否允许循环展开
    pub fn allows_loop_expansion(
        &self,
        length: Option<i32>,
    ) -> bool {
        if self.expand_loops {
            return true;
        }
        self.inline_loop_limit > 0
            && length.is_some_and(|len| len >= 0 && (len as u32) <= self.inline_loop_limit)
    }

    fn canonicalizer(&self) -> Canonicalizer {
        let mut config = CanonicalizerConfig::default();
        if self.max_canonical_rounds > 0 {
            config.max_rounds = self.max_canonical_rounds;
        }
        Canonicalizer::new(config)
    }
}

/// 降级所需的协作者
///
/// 跨编译共享：模板缓存通过 `Arc` 共享，其余部分只读。
#[derive(Debug, Clone)]
pub struct LoweringContext {
    stubs: StubRegistry,
    types: TypeUniverse,
    cache: Arc<SnippetCache>,
    policy: LoweringPolicy,
}

impl LoweringContext {
    pub fn new(
        stubs: StubRegistry,
        types: TypeUniverse,
        policy: LoweringPolicy,
    ) -> Self {
        Self {
            stubs,
            types,
            cache: Arc::new(SnippetCache::new()),
            policy,
        }
    }

    /// 使用默认桩与给定布局
    pub fn with_layout(layout: ArrayLayout) -> Self {
        Self::new(StubRegistry::with_defaults(), TypeUniverse::new(layout), LoweringPolicy::default())
    }

    /// 与其他上下文共享模板缓存
    pub fn with_cache(
        mut self,
        cache: Arc<SnippetCache>,
    ) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_policy(
        mut self,
        policy: LoweringPolicy,
    ) -> Self {
        self.policy = policy;
        self
    }

    pub fn stubs(&self) -> &StubRegistry {
        &self.stubs
    }

    pub fn types(&self) -> &TypeUniverse {
        &self.types
    }

    pub fn layout(&self) -> &ArrayLayout {
        self.types.layout()
    }

    pub fn cache(&self) -> &Arc<SnippetCache> {
        &self.cache
    }

    pub fn policy(&self) -> &LoweringPolicy {
        &self.policy
    }
}

impl Default for LoweringContext {
    fn default() -> Self {
        Self::with_layout(ArrayLayout::default())
    }
}

/// 降级报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoweringReport {
    /// 每种片段展开的节点数
    pub expanded: BTreeMap<SnippetId, usize>,
    /// 被包装为延迟节点的次数
    pub deferred: usize,
    /// 结束时仍在等待阶段的节点数
    pub waiting: usize,
    /// 不动点轮数
    pub rounds: usize,
    /// 被规范化删除的零长度拷贝
    pub zero_length_removed: usize,
    /// 被证明不会抛出的延迟节点
    pub non_throwing: usize,
}

impl LoweringReport {
    /// 展开总数
    pub fn expanded_total(&self) -> usize {
        self.expanded.values().sum()
    }

    /// 某种片段的展开数
    pub fn expanded_with(
        &self,
        snippet: SnippetId,
    ) -> usize {
        self.expanded.get(&snippet).copied().unwrap_or(0)
    }

    /// 合并后续阶段的报告；等待数取最新值
    pub fn absorb(
        &mut self,
        later: LoweringReport,
    ) {
        for (snippet, count) in later.expanded {
            *self.expanded.entry(snippet).or_insert(0) += count;
        }
        self.deferred += later.deferred;
        self.waiting = later.waiting;
        self.rounds += later.rounds;
        self.zero_length_removed += later.zero_length_removed;
        self.non_throwing += later.non_throwing;
    }

    fn record(
        &mut self,
        snippet: SnippetId,
    ) {
        *self.expanded.entry(snippet).or_insert(0) += 1;
    }
}

impl fmt::Display for LoweringReport {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "expanded {} (deferred {}, waiting {}, zero-length {}) in {} rounds",
            self.expanded_total(),
            self.deferred,
            self.waiting,
            self.zero_length_removed,
            self.rounds
        )
    }
}

/// 展开一个已满足阶段要求的延迟节点
///
/// 阶段未满足时返回 `PrematureExpansion`。
pub fn expand_delayed(
    ctx: &LoweringContext,
    graph: &mut Graph,
    id: NodeId,
) -> LoweringResult<Expansion> {
    let delayed = match graph.get(id).map(|n| n.kind()) {
        Some(NodeKind::DelayedCopy(delayed)) => delayed.clone(),
        _ => return Err(LoweringError::NotACopy(id)),
    };
    let mut expanded = delayed.clone();
    match expanded.expand(graph.stage()) {
        Ok(()) => {}
        Err(state) if state.is_terminal() => {
            return Err(LoweringError::MalformedExpansion {
                node: id,
                reason: format!("delayed copy is already {:?}", state),
            })
        }
        Err(_) => {
            return Err(LoweringError::PrematureExpansion {
                node: id,
                required: delayed.required_stage(),
                current: graph.stage(),
            })
        }
    }
    instantiate(ctx, graph, id, &delayed)
}

/// 降级阶段
#[derive(Debug, Default)]
pub struct LoweringPhase {
    report: LoweringReport,
}

impl LoweringPhase {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在图的当前阶段运行到不动点
    pub fn run(
        mut self,
        ctx: &LoweringContext,
        graph: &mut Graph,
    ) -> LoweringResult<LoweringReport> {
        debug!(graph = %graph.name(), stage = %graph.stage(), "lowering started");
        let mut canonicalizer = ctx.policy().canonicalizer();
        loop {
            self.report.rounds += 1;
            canonicalizer.run(graph)?;
            if !self.lower_round(ctx, graph)? {
                break;
            }
        }
        let stats = canonicalizer.stats();
        self.report.zero_length_removed = stats.removed_copies;
        self.report.non_throwing = stats.refined;
        self.report.waiting = graph
            .live_ids()
            .into_iter()
            .filter(|id| matches!(graph[*id].kind(), NodeKind::DelayedCopy(_)))
            .count();
        debug!(graph = %graph.name(), stage = %graph.stage(), report = %self.report, "lowering finished");
        Ok(self.report)
    }

    /// 一轮：返回是否有任何变化
    fn lower_round(
        &mut self,
        ctx: &LoweringContext,
        graph: &mut Graph,
    ) -> LoweringResult<bool> {
        let mut changed = false;
        for id in graph.live_ids() {
            let Some(node) = graph.get(id) else {
                continue;
            };
            match node.kind().clone() {
                NodeKind::ArrayCopy(copy) => {
                    let class = classify_node(graph, id, &copy, ctx.policy());
                    let delayed = DelayedCopyNode::new(copy, class.snippet, class.check, class.location);
                    if !class.snippet.is_deferred() && delayed.reached_required_stage(graph.stage()) {
                        instantiate(ctx, graph, id, &delayed)?;
                        self.report.record(class.snippet);
                    } else {
                        trace!(node = %id, snippet = %class.snippet, required = %delayed.required_stage(), "defer arraycopy");
                        graph.replace_kind(id, NodeKind::DelayedCopy(delayed))?;
                        self.report.deferred += 1;
                    }
                    changed = true;
                }
                NodeKind::DelayedCopy(delayed) if delayed.reached_required_stage(graph.stage()) => {
                    let expansion = expand_delayed(ctx, graph, id)?;
                    self.report.record(expansion.snippet);
                    changed = true;
                }
                _ => {}
            }
        }
        Ok(changed)
    }
}

/// 以默认阶段对象运行一次降级
pub fn lower(
    ctx: &LoweringContext,
    graph: &mut Graph,
) -> LoweringResult<LoweringReport> {
    LoweringPhase::new().run(ctx, graph)
}

/// 按顺序推进阶段并在每个阶段降级，直到 `target`
pub fn lower_through(
    ctx: &LoweringContext,
    graph: &mut Graph,
    target: GuardsStage,
) -> LoweringResult<LoweringReport> {
    let mut report = lower(ctx, graph)?;
    while graph.stage() < target {
        let Some(next) = graph.stage().next() else {
            break;
        };
        graph.set_stage(next)?;
        report.absorb(lower(ctx, graph)?);
    }
    Ok(report)
}
