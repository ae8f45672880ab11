//! IR 错误类型

use thiserror::Error;

use super::graph::NodeId;
use super::kind::ElementKind;
use super::location::LocationIdentity;
use super::stage::GuardsStage;

/// IR 结果
pub type IrResult<T> = Result<T, IrError>;

/// 节点构造与图操作的错误
///
/// 这些错误都表示编译器内部不一致，编译应当中止。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("a {kind} copy cannot kill {location}: only reference copies may kill any location")]
    InvalidKillLocation {
        kind: ElementKind,
        location: LocationIdentity,
    },

    #[error("{0} is not a live node")]
    DeadNode(NodeId),

    #[error("{0} is not a fixed node")]
    NotFixed(NodeId),

    #[error("{node} expects {expected} inputs, found {found}")]
    InputCount {
        node: NodeId,
        expected: usize,
        found: usize,
    },

    #[error("guards stage cannot move back from {from} to {to}")]
    StageRegression { from: GuardsStage, to: GuardsStage },

    #[error("canonicalizer did not reach a fixed point after {0} rewrites")]
    Diverged(usize),

    #[error("graph verification failed: {0}")]
    Malformed(String),
}
