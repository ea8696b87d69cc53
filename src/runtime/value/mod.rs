//! Core runtime value types
//!
//! Values shared between the evaluator, task result cells and channels.

pub mod runtime_value;
pub use runtime_value::*;

#[cfg(test)]
mod tests;
