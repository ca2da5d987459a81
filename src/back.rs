//! The back-end of the compiler.

pub mod codegen;
pub mod frame;

pub use codegen::*;
pub use frame::*;
