//! # MiniKV Error Types
//!
//! ## Design Principles
//!
//! 1. **Deterministic Replies**: Every protocol error renders to exactly one
//!    fixed response line, so clients never wait on a reply that never comes.
//! 2. **Static Text**: Messages are built from compile-time data (the verb set,
//!    arity table) and never leak internal error text to clients.
//! 3. **Low Overhead**: Enums are `Copy` so the dispatcher can return them by
//!    value on the hot path.

use thiserror::Error;

use crate::protocol::{Verb, SUPPORTED_VERBS};

/// Result type for request parsing.
pub type ProtocolResult<T> = core::result::Result<T, ProtocolError>;

/// Errors raised while turning a request line into a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
pub enum ProtocolError {
    /// The line held no tokens at all.
    #[error("empty command, expected one of: {}", SUPPORTED_VERBS)]
    EmptyCommand,
    /// The first token is not a supported verb.
    #[error("unknown command")]
    UnknownCommand,
    /// Too few or too many arguments for a fixed-arity verb.
    #[error("wrong number of arguments for '{verb}' (required {required})")]
    WrongArity { verb: Verb, required: usize },
    /// `MSET` received a key without a matching value.
    #[error("wrong number of arguments for '{verb}' (expected key/value pairs)")]
    UnpairedArguments { verb: Verb },
    /// A key token is empty or contains whitespace.
    #[error("invalid key")]
    InvalidKey,
    /// A value token contains a control character other than tab.
    #[error("invalid value")]
    InvalidValue,
    /// A quoted token was not closed, or was followed by non-whitespace.
    #[error("unbalanced quotes")]
    UnbalancedQuotes,
    /// The request bytes are not valid UTF-8.
    #[error("invalid utf-8 in request")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Returns true for the error rendered as the bare `UNKNOWN` line.
    pub const fn is_unknown_command(self) -> bool {
        matches!(self, Self::UnknownCommand)
    }
}

/// Errors raised when validating keys and values on the client side.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
pub enum KeyError {
    /// Keys must contain at least one character.
    #[error("key must not be empty")]
    EmptyKey,
    /// Keys must not contain spaces, tabs, or line breaks.
    #[error("key must not contain whitespace")]
    KeyWhitespace,
    /// Values must not contain line breaks or other control characters.
    #[error("value must not contain control characters")]
    ValueControl,
}
