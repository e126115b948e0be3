//! Typed failure conditions.
//!
//! Every fallible API returns `anyhow::Result`; these enums are what callers
//! recover with `err.downcast_ref::<CompileError>()` when they need to branch.

use thiserror::Error;

use super::types::{BlockIndex, GlslType, Phase};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("missing connection on outlet `{outlet}` for parameter `{parameter}` of block {block}")]
    MissingConnection {
        block: BlockIndex,
        parameter: String,
        outlet: String,
    },

    #[error("can't compile material block {block} with {outputs} output outlet(s)")]
    InvalidGraph { block: BlockIndex, outputs: usize },

    #[error("connection cycle re-enters block {block} during {phase} emission")]
    CycleDetected { block: BlockIndex, phase: Phase },

    #[error("`{name}` declared as {declared} in {scope}, requested as {requested}")]
    TypeMismatch {
        scope: String,
        name: String,
        declared: GlslType,
        requested: GlslType,
    },

    #[error("no outlet named `{outlet}` on block {block:?}")]
    UnknownOutlet {
        block: Option<BlockIndex>,
        outlet: String,
    },

    #[error("block {0} is not part of the graph")]
    UnknownBlock(BlockIndex),

    #[error("vertex and fragment sources disagree on outlet `{name}`")]
    OutletConflict { name: String },

    #[error("block {0} is not a material")]
    NotAMaterial(BlockIndex),

    #[error("node is already owned by block {0}")]
    OwnerAlreadyBound(BlockIndex),

    #[error("can't connect {from} to {to}: {reason}")]
    InvalidConnection {
        from: String,
        to: String,
        reason: &'static str,
    },
}

/// Failures while reading a fragment's source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("unbalanced braces in fragment source")]
    UnbalancedBraces,

    #[error("statement `{0}` is missing its terminating `;`")]
    UnterminatedStatement(String),

    #[error("fragment source defines no function")]
    NoEntryFunction,

    #[error("malformed parameter `{0}`")]
    MalformedParameter(String),

    #[error("unsupported qualifier `{qualifier}` on parameter `{parameter}`")]
    UnsupportedQualifier { parameter: String, qualifier: String },

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("malformed uniform declaration `{0}`")]
    MalformedUniform(String),
}
