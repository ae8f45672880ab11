//! VM errors
//!
//! 这里的错误表示图本身有问题（或宿主调用方式不对），
//! 与客体程序的异常、去优化不同：后两者是正常的执行结果。

use thiserror::Error;

use crate::middle::core::graph::NodeId;

/// VM result
pub type VMResult<T> = Result<T, VMError>;

/// VM errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VMError {
    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Dangling object reference @{0}")]
    DanglingReference(usize),

    #[error("Missing argument for parameter {0}")]
    MissingArgument(u32),

    #[error("Null dereference at {0}")]
    NullDereference(NodeId),

    #[error("Division by zero at {0}")]
    DivisionByZero(NodeId),

    /// 未经校验的拷贝越界：降级遗漏了必要的守卫
    #[error("unchecked copy {node} out of bounds: [{src_pos}, +{length}) from {src_length}, [{dest_pos}, +{length}) into {dest_length}")]
    UncheckedOutOfBounds {
        node: NodeId,
        src_pos: i32,
        dest_pos: i32,
        length: i32,
        src_length: usize,
        dest_length: usize,
    },

    /// 未经校验的拷贝遇到类型不匹配的数组
    #[error("unchecked copy {0} between incompatible arrays")]
    UncheckedTypeMismatch(NodeId),

    #[error("Unsupported node {0}")]
    Unsupported(NodeId),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
