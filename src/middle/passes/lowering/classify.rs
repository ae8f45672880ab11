//! 拷贝策略分类
//!
//! 按源/目标的静态类型与精确可赋值标志，选出降级片段与仍需执行的
//! 动态类型检查。决策表按顺序匹配，第一条命中者生效：
//!
//! | # | 条件 | 片段 | 检查 |
//! |---|------|------|------|
//! | 1 | 任一侧可证明不是数组 | NativeExceptionPath | Undefined |
//! | 2 | 精确可赋值 | StubCall | None |
//! | 3 | 两侧元素类型都未知 | Generic | None |
//! | 4 | 两侧都已知：都是引用 | Checkcast | None |
//! |   | 同一种基本类型 | StubCall | None |
//! |   | 其他组合 | NativeExceptionPath | Undefined |
//! | 5 | 仅一侧已知：基本类型 | StubCall | HubBased |
//! |   | 引用类型 | Checkcast | LayoutHelperBased |
//!
//! 允许展开循环时，StubCall 改为 ExpandedLoopStubCall。

use tracing::trace;

use crate::middle::core::copy::{CopyNode, SnippetId, TypeCheckKind, DEST, LENGTH, SRC};
use crate::middle::core::graph::{Graph, NodeId};
use crate::middle::core::location::LocationIdentity;
use crate::middle::core::types::{Component, TypeRef};

use super::LoweringPolicy;

/// 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub snippet: SnippetId,
    pub check: TypeCheckKind,
    /// 传给片段的内存位置
    pub location: LocationIdentity,
}

fn is_not_array(ty: Option<&TypeRef>) -> bool {
    ty.is_some_and(TypeRef::is_provably_not_array)
}

/// 纯决策表
pub fn classify(
    src: Option<&TypeRef>,
    dest: Option<&TypeRef>,
    exact: bool,
    expand_loops: bool,
) -> (SnippetId, TypeCheckKind) {
    let (snippet, check) = decide(src, dest, exact);
    if expand_loops && snippet == SnippetId::StubCall {
        (SnippetId::ExpandedLoopStubCall, check)
    } else {
        (snippet, check)
    }
}

fn decide(
    src: Option<&TypeRef>,
    dest: Option<&TypeRef>,
    exact: bool,
) -> (SnippetId, TypeCheckKind) {
    if is_not_array(src) || is_not_array(dest) {
        return (SnippetId::NativeExceptionPath, TypeCheckKind::Undefined);
    }
    if exact {
        return (SnippetId::StubCall, TypeCheckKind::None);
    }
    let src = src.and_then(TypeRef::component);
    let dest = dest.and_then(TypeRef::component);
    match (src, dest) {
        (None, None) => (SnippetId::Generic, TypeCheckKind::None),
        (Some(Component::Reference(_)), Some(Component::Reference(_))) => {
            (SnippetId::Checkcast, TypeCheckKind::None)
        }
        (Some(Component::Primitive(a)), Some(Component::Primitive(b))) if a == b => {
            (SnippetId::StubCall, TypeCheckKind::None)
        }
        (Some(_), Some(_)) => (SnippetId::NativeExceptionPath, TypeCheckKind::Undefined),
        (Some(Component::Primitive(_)), None) | (None, Some(Component::Primitive(_))) => {
            (SnippetId::StubCall, TypeCheckKind::HubBased)
        }
        (Some(Component::Reference(_)), None) | (None, Some(Component::Reference(_))) => {
            (SnippetId::Checkcast, TypeCheckKind::LayoutHelperBased)
        }
    }
}

/// 对图中的拷贝节点分类
pub fn classify_node(
    graph: &Graph,
    id: NodeId,
    copy: &CopyNode,
    policy: &LoweringPolicy,
) -> Classification {
    let node = &graph[id];
    let src = graph.object_stamp(node.input(SRC));
    let dest = graph.object_stamp(node.input(DEST));
    let expand_loops = policy.allows_loop_expansion(graph.int_constant(node.input(LENGTH)));
    let (snippet, check) = classify(src.ty.as_ref(), dest.ty.as_ref(), copy.is_exact(), expand_loops);
    trace!(node = %id, %snippet, ?check, "classified arraycopy");
    Classification {
        snippet,
        check,
        location: copy.kill_identity(),
    }
}
