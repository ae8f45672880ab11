//! Reference executor
//!
//! 在一个小型堆上执行 IR 图，用于比较降级前后的行为。

pub use errors::{VMError, VMResult};
pub use executor::{run, Executor, GuestException, Outcome};
pub use heap::{Heap, HeapObject, ObjectRef, Value};

mod errors;
mod executor;
pub mod heap;

#[cfg(test)]
mod tests;
