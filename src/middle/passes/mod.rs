//! 编译器各个阶段
//!
//! 包含中间层的各个变换阶段：规范化与分阶段降级。

pub mod canonical;
pub mod lowering;

#[cfg(test)]
pub mod tests;
