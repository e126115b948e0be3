//! Shader graph compiler.
//!
//! This module is organized into several submodules:
//! - `types`: Phase, direction and value type tags
//! - `errors`: typed failure conditions
//! - `signature`: fragment parsing and call-site rendering
//! - `outlets`: outlet descriptors derived from a signature
//! - `block`: Snippet / Material blocks wrapping graph nodes
//! - `emit`: the recursive call-emission algorithm
//! - `program`: the program accumulator and its rendered output
//!
//! The main entry point is [`Block::compile`] on a material block (or
//! [`crate::graph::ShaderGraph::compile`]).

pub mod block;
pub mod emit;
pub mod errors;
pub mod outlets;
pub mod program;
pub mod signature;
pub mod types;

pub use block::{Block, BlockContext, BlockKind};
pub use emit::CompileContext;
pub use errors::{CompileError, SignatureError};
pub use program::{CompiledProgram, Program};
pub use signature::{Fragment, Signature};
pub use types::{BlockIndex, Direction, GlslType, OutletCategory, Phase};
