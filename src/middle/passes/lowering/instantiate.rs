//! 片段实例化
//!
//! 把缓存的模板绑定到拷贝节点的实际操作数上，生成一段固定节点链，
//! 再拼接到原节点的位置：
//!
//! 1. 空检查（操作数可能为空时）
//! 2. 类型检查（按 `TypeCheckKind`）
//! 3. 五个边界检查，顺序固定，第一个失败者去优化
//! 4. 数据搬运：拷贝桩、元素循环、存储检查拷贝或运行时例程
//!
//! 运行时例程（`NativeExceptionPath` 与 `Generic`）自行完成全部校验，
//! 不发出 1-3；它们的操作数在运行时未必是数组。
//!
//! 残留调用必须携带原节点的帧状态与字节码位置，提交前检查。

use tracing::{debug, trace};

use crate::middle::core::copy::{
    DelayedCopyNode, SnippetId, TypeCheckKind, DEST, DEST_POS, LENGTH, OPERAND_COUNT, SRC,
    SRC_POS,
};
use crate::middle::core::graph::{Graph, NodeId};
use crate::middle::core::kind::ValueKind;
use crate::middle::core::node::{ArithOp, CompareOp, DeoptAction, DeoptReason, NodeKind, Traversal};

use super::error::{LoweringError, LoweringResult};
use super::snippet::Transfer;
use super::stubs::StubKey;
use super::LoweringContext;

/// 去优化后回到解释器重试，不禁止再次编译
const GUARD_ACTION: DeoptAction = DeoptAction::InvalidateReprofile;

/// 一次展开的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub snippet: SnippetId,
    /// 新的固定节点，按控制顺序
    pub chain: Vec<NodeId>,
    /// 搬运数据的节点
    pub transfer: NodeId,
}

impl Expansion {
    /// 其中的守卫个数
    pub fn guard_count(
        &self,
        graph: &Graph,
    ) -> usize {
        self.chain
            .iter()
            .filter(|id| matches!(graph[**id].kind(), NodeKind::FixedGuard { .. }))
            .count()
    }
}

struct Emitter<'g> {
    graph: &'g mut Graph,
    state: Option<NodeId>,
    chain: Vec<NodeId>,
}

impl Emitter<'_> {
    fn fixed(
        &mut self,
        kind: NodeKind,
        inputs: &[NodeId],
    ) -> NodeId {
        let id = self.graph.add(kind, inputs);
        self.chain.push(id);
        id
    }

    /// 条件为 `!negated` 时通过，否则去优化
    fn guard(
        &mut self,
        condition: NodeId,
        reason: DeoptReason,
        negated: bool,
    ) {
        let guard = self.fixed(
            NodeKind::FixedGuard {
                reason,
                action: GUARD_ACTION,
                negated,
            },
            &[condition],
        );
        self.graph.set_state_after(guard, self.state);
    }

    fn compare(
        &mut self,
        op: CompareOp,
        kind: ValueKind,
        a: NodeId,
        b: NodeId,
    ) -> NodeId {
        self.graph.unique(NodeKind::Compare { op, kind }, &[a, b])
    }

    fn null_check(
        &mut self,
        object: NodeId,
    ) {
        if self.graph.object_stamp(object).non_null {
            return;
        }
        let is_null = self.graph.unique(NodeKind::IsNull, &[object]);
        self.guard(is_null, DeoptReason::NullCheckException, true);
    }

    fn type_check(
        &mut self,
        check: TypeCheckKind,
        src: NodeId,
        dest: NodeId,
    ) {
        let (load, kind) = match check {
            TypeCheckKind::HubBased => (NodeKind::LoadHub, ValueKind::Object),
            TypeCheckKind::LayoutHelperBased => (NodeKind::LoadLayoutHelper, ValueKind::Int),
            TypeCheckKind::None | TypeCheckKind::Undefined => return,
        };
        let a = self.graph.unique(load.clone(), &[src]);
        let b = self.graph.unique(load, &[dest]);
        let same = self.compare(CompareOp::Eq, kind, a, b);
        self.guard(same, DeoptReason::RuntimeConstraint, false);
    }

    /// `value >= 0`
    fn non_negative(
        &mut self,
        value: NodeId,
    ) {
        let zero = self.graph.int(0);
        let negative = self.compare(CompareOp::Lt, ValueKind::Int, value, zero);
        self.guard(negative, DeoptReason::BoundsCheckException, true);
    }

    /// `offset + length <= array.length`，写成 `offset <= array.length - length`
    fn within(
        &mut self,
        array: NodeId,
        offset: NodeId,
        length: NodeId,
    ) {
        let array_length = self.graph.unique(NodeKind::ArrayLength, &[array]);
        let room = self.graph.unique(
            NodeKind::Binary {
                op: ArithOp::Sub,
                kind: ValueKind::Int,
            },
            &[array_length, length],
        );
        let overflow = self.compare(CompareOp::Lt, ValueKind::Int, room, offset);
        self.guard(overflow, DeoptReason::BoundsCheckException, true);
    }
}

/// 展开延迟拷贝节点 `id`
///
/// 调用者负责检查阶段；这里只负责生成与拼接。
pub fn instantiate(
    ctx: &LoweringContext,
    graph: &mut Graph,
    id: NodeId,
    delayed: &DelayedCopyNode,
) -> LoweringResult<Expansion> {
    let template = ctx.cache().get_or_build(delayed.snippet(), graph.stage());
    let operands: Vec<NodeId> = graph[id].inputs().to_vec();
    if operands.len() != OPERAND_COUNT {
        return Err(LoweringError::MalformedExpansion {
            node: id,
            reason: format!("expected {} operands, found {}", OPERAND_COUNT, operands.len()),
        });
    }
    let (src, src_pos, dest, dest_pos, length) = (
        operands[SRC],
        operands[SRC_POS],
        operands[DEST],
        operands[DEST_POS],
        operands[LENGTH],
    );
    let state = graph[id].state_after();
    let mut copy = delayed.copy().clone();
    let bci = copy.bci();

    let mut emitter = Emitter {
        graph,
        state,
        chain: Vec::new(),
    };

    if template.validates {
        emitter.null_check(src);
        emitter.null_check(dest);
        emitter.type_check(delayed.check(), src, dest);
        emitter.non_negative(src_pos);
        emitter.non_negative(dest_pos);
        emitter.non_negative(length);
        emitter.within(src, src_pos, length);
        emitter.within(dest, dest_pos, length);
    }

    let transfer = match template.transfer {
        Transfer::Stub => {
            let (src_fact, dest_fact) = (emitter.graph.offset_fact(src_pos), emitter.graph.offset_fact(dest_pos));
            copy.update_aligned_disjoint(src_fact, dest_fact, ctx.layout());
            let stub = ctx
                .stubs()
                .resolve(StubKey {
                    kind: copy.kind(),
                    aligned: copy.is_aligned(),
                    disjoint: copy.is_disjoint(),
                    uninitialized: copy.is_uninitialized(),
                    location: delayed.location(),
                })?
                .clone();
            emitter.fixed(NodeKind::StubCall { stub, bci }, &operands)
        }
        Transfer::ElementLoop => {
            let (src_fact, dest_fact) = (emitter.graph.offset_fact(src_pos), emitter.graph.offset_fact(dest_pos));
            copy.update_aligned_disjoint(src_fact, dest_fact, ctx.layout());
            let traversal = if copy.is_disjoint() {
                Traversal::Forward
            } else {
                Traversal::Dynamic
            };
            emitter.fixed(
                NodeKind::CopyLoop {
                    kind: copy.kind(),
                    traversal,
                    location: delayed.location(),
                },
                &operands,
            )
        }
        Transfer::StoreCheck => {
            let element_hub = emitter.graph.unique(NodeKind::LoadElementHub, &[dest]);
            let mut inputs = operands.clone();
            inputs.push(element_hub);
            emitter.fixed(
                NodeKind::CheckcastCopy {
                    location: delayed.location(),
                    bci,
                },
                &inputs,
            )
        }
        Transfer::Runtime(target) => emitter.fixed(
            NodeKind::RuntimeCall {
                target,
                kind: copy.kind(),
                bci,
            },
            &operands,
        ),
    };
    if emitter.graph[transfer].kind().residual_call_bci().is_some() {
        emitter.graph.set_state_after(transfer, state);
    }
    let chain = emitter.chain;

    verify_residual_calls(graph, id, bci, state, &chain)?;

    if delayed.may_throw() && template.may_throw {
        graph.move_exception_edge(id, transfer);
    }
    trace!(node = %id, snippet = %delayed.snippet(), nodes = chain.len(), "splice expansion");
    graph.splice_fixed(id, &chain)?;
    graph.remove_dead_floating();
    debug!(
        graph = %graph.name(),
        node = %id,
        snippet = %delayed.snippet(),
        transfer = %graph[transfer].kind(),
        "expanded arraycopy"
    );

    Ok(Expansion {
        snippet: delayed.snippet(),
        chain,
        transfer,
    })
}

fn verify_residual_calls(
    graph: &Graph,
    original: NodeId,
    bci: i32,
    state: Option<NodeId>,
    chain: &[NodeId],
) -> LoweringResult<()> {
    for call in chain {
        let node = &graph[*call];
        let Some(call_bci) = node.kind().residual_call_bci() else {
            continue;
        };
        if call_bci != bci || node.state_after() != state {
            return Err(LoweringError::FrameStateMismatch {
                call: *call,
                original,
                expected: bci,
            });
        }
    }
    Ok(())
}
