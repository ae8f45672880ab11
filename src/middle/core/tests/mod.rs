//! 图原语测试
//!
//! 覆盖值编号、使用边维护、控制链拼接与内存链重连。

use crate::middle::core::copy::CopyNode;
use crate::middle::core::graph::Graph;
use crate::middle::core::kind::{ElementKind, ValueKind};
use crate::middle::core::node::{ArithOp, DeoptAction, DeoptReason, NodeKind};
use crate::middle::core::stage::GuardsStage;
use crate::middle::core::types::{ObjectStamp, Stamp, TypeRef};
use crate::middle::core::IrError;

fn int_array_param(
    graph: &mut Graph,
    index: u32,
) -> crate::middle::core::NodeId {
    graph.parameter(
        index,
        Stamp::Object(ObjectStamp::exact(TypeRef::PrimitiveArray(ElementKind::Int)).non_null()),
    )
}

#[test]
fn test_value_numbering_shares_identical_nodes() {
    let mut graph = Graph::new("vn");
    let x = graph.parameter(0, Stamp::Int);
    let one = graph.int(1);
    let a = graph.unique(
        NodeKind::Binary {
            op: ArithOp::Add,
            kind: ValueKind::Int,
        },
        &[x, one],
    );
    let b = graph.unique(
        NodeKind::Binary {
            op: ArithOp::Add,
            kind: ValueKind::Int,
        },
        &[x, one],
    );
    assert_eq!(a, b);
    assert_eq!(graph.int(1), one);
    graph.verify().unwrap();
}

#[test]
fn test_replace_at_usages_merges_equivalent_users() {
    let mut graph = Graph::new("merge");
    let x = graph.parameter(0, Stamp::Int);
    let y = graph.parameter(1, Stamp::Int);
    let add = NodeKind::Binary {
        op: ArithOp::Add,
        kind: ValueKind::Int,
    };
    let ax = graph.unique(add.clone(), &[x, x]);
    let ay = graph.unique(add, &[y, y]);
    let guard = graph.append(
        NodeKind::FixedGuard {
            reason: DeoptReason::RuntimeConstraint,
            action: DeoptAction::InvalidateReprofile,
            negated: false,
        },
        &[ay],
    );
    graph.replace_at_usages(y, x);
    // y + y 变成 x + x，应与已有节点合并
    assert_eq!(graph[guard].input(0), ax);
    graph.remove_dead_floating();
    assert!(!graph.is_live(ay));
    graph.verify().unwrap();
}

#[test]
fn test_append_links_memory_chain() {
    let mut graph = Graph::new("memory");
    let src = int_array_param(&mut graph, 0);
    let dst = int_array_param(&mut graph, 1);
    let zero = graph.int(0);
    let len = graph.int(4);
    let first = graph.append(
        NodeKind::ArrayCopy(CopyNode::new(ElementKind::Int, 1)),
        &[src, zero, dst, zero, len],
    );
    let second = graph.append(
        NodeKind::ArrayCopy(CopyNode::new(ElementKind::Int, 2)),
        &[dst, zero, src, zero, len],
    );
    graph.append(NodeKind::Return, &[]);
    assert_eq!(graph[first].last_memory_access(), Some(graph.start()));
    assert_eq!(graph[second].last_memory_access(), Some(first));
    assert_eq!(graph.memory_chain(second), vec![first, graph.start()]);
    graph.verify().unwrap();
}

#[test]
fn test_remove_fixed_reconnects_memory() {
    let mut graph = Graph::new("remove");
    let src = int_array_param(&mut graph, 0);
    let zero = graph.int(0);
    let len = graph.int(2);
    let first = graph.append(
        NodeKind::ArrayCopy(CopyNode::new(ElementKind::Int, 1)),
        &[src, zero, src, zero, len],
    );
    let second = graph.append(
        NodeKind::ArrayCopy(CopyNode::new(ElementKind::Int, 2)),
        &[src, zero, src, zero, len],
    );
    graph.remove_fixed(first).unwrap();
    assert_eq!(graph[second].last_memory_access(), Some(graph.start()));
    assert_eq!(graph[second].predecessor(), Some(graph.start()));
    assert_eq!(graph.fixed_chain(), vec![graph.start(), second]);
    graph.verify().unwrap();
}

#[test]
fn test_replace_with_deopt_kills_successors() {
    let mut graph = Graph::new("deopt");
    let cond = graph.int(0);
    let guard = graph.append(
        NodeKind::FixedGuard {
            reason: DeoptReason::BoundsCheckException,
            action: DeoptAction::InvalidateReprofile,
            negated: false,
        },
        &[cond],
    );
    let ret = graph.append(NodeKind::Return, &[]);
    let deopt = graph
        .replace_with_deopt(guard, DeoptReason::BoundsCheckException, DeoptAction::InvalidateReprofile)
        .unwrap();
    assert!(!graph.is_live(ret));
    assert!(!graph.is_live(guard));
    assert_eq!(graph.fixed_chain(), vec![graph.start(), deopt]);
    graph.verify().unwrap();
}

#[test]
fn test_exception_handler_removed_with_node() {
    let mut graph = Graph::new("handler");
    let src = int_array_param(&mut graph, 0);
    let zero = graph.int(0);
    let copy = graph.append(
        NodeKind::ArrayCopy(CopyNode::new(ElementKind::Int, 1)),
        &[src, zero, src, zero, zero],
    );
    let handler = graph.add_exception_handler(copy);
    let unwind = graph.add_fixed_after(handler, NodeKind::Return, &[]);
    graph.remove_fixed(copy).unwrap();
    assert!(!graph.is_live(handler));
    assert!(!graph.is_live(unwind));
    graph.verify().unwrap();
}

#[test]
fn test_stage_is_monotonic() {
    let mut graph = Graph::new("stage");
    graph.set_stage(GuardsStage::AfterFsa).unwrap();
    let err = graph.set_stage(GuardsStage::FixedDeopts).unwrap_err();
    assert!(matches!(err, IrError::StageRegression { .. }));
}
