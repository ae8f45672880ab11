//! Strata
//!
//! A graph IR for a JIT compiler's middle end: canonicalization and the
//! staged lowering of high-level array copies into guarded stub calls,
//! element loops and runtime calls.
//!
//! # Example
//!
//! ```no_run
//! use strata::middle::{GuardsStage, LoweringContext};
//! use strata::{compile, Result};
//!
//! fn lower_all(graphs: &mut [strata::middle::Graph]) -> Result<()> {
//!     let ctx = LoweringContext::default();
//!     compile::lower_batch(&ctx, graphs, GuardsStage::AfterFsa)?;
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]

// Public modules
pub mod compile;
pub mod middle;
pub mod vm;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
