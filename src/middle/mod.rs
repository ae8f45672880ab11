//! 中间表示与变换
//!
//! `core` 定义图 IR，`passes` 在其上实现规范化与数组拷贝的分阶段降级。

pub mod core;
pub mod passes;

pub use self::core::*;
pub use passes::canonical::{canonicalize, Canonical, Canonicalizer};
pub use passes::lowering::{LoweringContext, LoweringError, LoweringPhase, LoweringReport};
