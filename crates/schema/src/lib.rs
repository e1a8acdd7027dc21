//! Canonical message model shared by every provider adapter.
//!
//! Providers translate their wire formats into [`Message`] values. Streamed responses arrive
//! as a sequence of partial messages (deltas) which the [`Concatenator`] folds back into one
//! final message.

mod concat;
mod error;
mod extra;
mod message;

pub use concat::{ConcatRegistry, Concatenator, ExtraConcatFn, concat_messages};
pub use error::ConcatError;
pub use extra::{Extra, ExtraValue};
pub use message::{
    FunctionCall, LogProb, LogProbs, Message, ResponseMeta, Role, TokenUsage, ToolCall, TopLogProb,
};
