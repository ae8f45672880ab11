//! 核心中间表示
//!
//! 定义图 IR 的核心数据结构：节点种类、图存储、内存效果模型、
//! 静态类型事实与数组拷贝节点。这是整个 middle 层的基石，
//! 规范化与降级都建立在这里的原语之上。

pub mod copy;
pub mod error;
pub mod graph;
pub mod kind;
pub mod location;
pub mod node;
pub mod stage;
pub mod types;

#[cfg(test)]
mod tests;

pub use copy::{CopyNode, DelayedCopyNode, DelayedState, OffsetFact, SnippetId, TypeCheckKind};
pub use error::{IrError, IrResult};
pub use graph::{Graph, Node, NodeId};
pub use kind::{ArrayLayout, ElementKind, ValueKind};
pub use location::{LocationIdentity, MemoryEffects};
pub use node::{
    ArithOp, CompareOp, Constant, DeoptAction, DeoptReason, NodeKind, RuntimeTarget, StubDescriptor,
    Traversal, UnaryOp,
};
pub use stage::GuardsStage;
pub use types::{ClassId, ObjectStamp, Stamp, TypeRef, TypeUniverse};
