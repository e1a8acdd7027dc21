use crate::Role;

/// Errors raised while folding a message sequence into one message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConcatError {
    /// There was nothing to concatenate.
    #[error("cannot concatenate an empty message sequence")]
    Empty,

    /// Messages of one logical response disagree on their role.
    #[error("cannot concatenate messages with different roles: {expected:?} and {found:?}")]
    RoleMismatch { expected: Role, found: Role },

    /// Two values stored under the same extra key have different kinds.
    #[error("cannot concatenate extra field '{key}': {left} and {right} values")]
    ExtraMismatch {
        key: String,
        left: &'static str,
        right: &'static str,
    },

    /// A registered concatenation function rejected its inputs.
    #[error("cannot concatenate extra field '{key}': {reason}")]
    Extra { key: String, reason: String },
}
