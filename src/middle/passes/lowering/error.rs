//! 降级错误
//!
//! 这里只有编译器内部不一致：客体可见的失败（越界、存储类型不符）
//! 被编译成运行时检查，永远不会在编译期报告。

use thiserror::Error;

use crate::middle::core::error::IrError;
use crate::middle::core::graph::NodeId;
use crate::middle::core::kind::ElementKind;
use crate::middle::core::location::LocationIdentity;
use crate::middle::core::stage::GuardsStage;

/// 降级结果
pub type LoweringResult<T> = Result<T, LoweringError>;

/// 致命的降级错误，编译应当中止
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoweringError {
    #[error(
        "no stub registered for {kind} copy (aligned: {aligned}, disjoint: {disjoint}, uninitialized: {uninitialized}, kills {location})"
    )]
    MissingStub {
        kind: ElementKind,
        aligned: bool,
        disjoint: bool,
        uninitialized: bool,
        location: LocationIdentity,
    },

    #[error("{node} cannot be expanded at {current}: it requires {required}")]
    PrematureExpansion {
        node: NodeId,
        required: GuardsStage,
        current: GuardsStage,
    },

    #[error("residual call {call} does not carry the frame state of {original} (bci {expected})")]
    FrameStateMismatch {
        call: NodeId,
        original: NodeId,
        expected: i32,
    },

    #[error("malformed expansion of {node}: {reason}")]
    MalformedExpansion { node: NodeId, reason: String },

    #[error("{0} is not an array copy")]
    NotACopy(NodeId),

    #[error(transparent)]
    Ir(#[from] IrError),
}
