//! 固定节点的规范化规则

use tracing::trace;

use crate::middle::core::copy::{SnippetId, DEST, LENGTH};
use crate::middle::core::graph::{Graph, NodeId};
use crate::middle::core::node::{DeoptAction, DeoptReason, NodeKind};
use crate::middle::core::types::TypeRef;

use super::Canonical;

/// 长度为常量零的拷贝没有任何效果
pub fn copy(
    graph: &Graph,
    id: NodeId,
) -> Canonical {
    let node = &graph[id];
    if graph.int_constant(node.input(LENGTH)) == Some(0) {
        if let NodeKind::DelayedCopy(delayed) = node.kind() {
            let state = delayed.clone().kill();
            trace!(node = %id, snippet = %delayed.snippet(), ?state, "zero-length delayed copy");
        }
        return Canonical::Delete;
    }
    if let NodeKind::DelayedCopy(delayed) = node.kind() {
        if delayed.snippet() == SnippetId::Checkcast
            && delayed.may_throw()
            && stores_never_fail(graph, node.input(DEST))
        {
            let mut refined = delayed.clone();
            refined.set_non_throwing();
            return Canonical::Refine(NodeKind::DelayedCopy(refined));
        }
    }
    Canonical::Unchanged
}

/// 目标精确为根引用类型的数组时，任何引用都能存入
fn stores_never_fail(
    graph: &Graph,
    dest: NodeId,
) -> bool {
    let stamp = graph.object_stamp(dest);
    stamp.exact
        && matches!(
            &stamp.ty,
            Some(TypeRef::ObjectArray(element)) if **element == TypeRef::Root
        )
}

pub fn guard(
    graph: &Graph,
    id: NodeId,
    reason: DeoptReason,
    action: DeoptAction,
    negated: bool,
) -> Canonical {
    let Some(condition) = graph.int_constant(graph[id].input(0)) else {
        return Canonical::Unchanged;
    };
    if (condition != 0) != negated {
        Canonical::Delete
    } else {
        Canonical::Deoptimize { reason, action }
    }
}
