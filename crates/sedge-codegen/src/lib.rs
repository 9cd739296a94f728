//! Rust source generator for compiled table machines.
//!
//! Lowers a [`sedge_table::Machine`] into a self-contained source unit:
//! an integer state variable, one `match` per state over the input
//! symbol, actions translated to direct statements against a miniature
//! embedded runtime, and a `transform(input, cancelled)` entry point
//! behaviorally identical to interpreting the machine in `Function`
//! mode. The generated module depends only on `std`.

pub mod emit;
pub mod error;
mod runtime;

pub use emit::generate;
pub use error::{CodegenError, CodegenResult};
