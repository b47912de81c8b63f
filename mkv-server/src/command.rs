//! # Command Dispatch
//!
//! Turn one request line into a `Command`, run it against the engine, and
//! encode the `Reply`.
//!
//! ## Design Principles
//!
//! 1. **Validate, Then Mutate**: Parsing checks arity and every key before a
//!    command exists, so a rejected request never touches the store.
//! 2. **Static Dispatch**: Commands are an enum over the fixed verb set.
//! 3. **Always Answer**: Every request yields at least one reply line except
//!    `KEYS` on an empty store, so a client is never left waiting on an error.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::debug;

use mkv_common::{
    tokenize, validate_key, validate_value, ProtocolError, ProtocolResult, Verb, ERROR_PREFIX, RESPONSE_NULL,
    RESPONSE_OK, RESPONSE_UNKNOWN,
};
use mkv_engine::KvEngine;

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    MGet { keys: Vec<String> },
    Set { key: String, value: String },
    MSet { pairs: Vec<(String, String)> },
    Del { key: String },
    DbSize,
    Keys,
}

/// Result of executing a command, ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK`
    Ok,
    /// One value line or `NULL`.
    Value(Option<Arc<str>>),
    /// One value-or-`NULL` line per requested key.
    Values(Vec<Option<Arc<str>>>),
    /// Decimal count.
    Size(usize),
    /// One line per key.
    Keys(Vec<String>),
    /// `UNKNOWN` or `ERR <reason>`.
    Error(ProtocolError),
}

impl Command {
    /// Parses a raw request line, including its line terminator if present.
    pub fn parse_bytes(line: &[u8]) -> ProtocolResult<Command> {
        let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        Command::parse(line)
    }

    /// Parses one request line.
    pub fn parse(line: &str) -> ProtocolResult<Command> {
        let mut tokens = tokenize(line)?.into_iter();
        let verb = match tokens.next() {
            Some(token) => Verb::parse(&token).ok_or(ProtocolError::UnknownCommand)?,
            None => return Err(ProtocolError::EmptyCommand),
        };
        let args: Vec<String> = tokens.collect();
        check_arity(verb, args.len())?;

        let mut args = args.into_iter();
        let command = match verb {
            Verb::Get => Command::Get {
                key: next_key(&mut args)?,
            },
            Verb::MGet => Command::MGet {
                keys: args.map(checked_key).collect::<ProtocolResult<_>>()?,
            },
            Verb::Set => Command::Set {
                key: next_key(&mut args)?,
                value: checked_value(args.next().unwrap_or_default())?,
            },
            Verb::MSet => {
                let mut pairs = Vec::with_capacity(args.len() / 2);
                while let Some(key) = args.next() {
                    let value = args.next().unwrap_or_default();
                    pairs.push((checked_key(key)?, checked_value(value)?));
                }
                Command::MSet { pairs }
            }
            Verb::Del => Command::Del {
                key: next_key(&mut args)?,
            },
            Verb::DbSize => Command::DbSize,
            Verb::Keys => Command::Keys,
        };
        Ok(command)
    }

    /// The verb this command was parsed from.
    pub fn verb(&self) -> Verb {
        match self {
            Command::Get { .. } => Verb::Get,
            Command::MGet { .. } => Verb::MGet,
            Command::Set { .. } => Verb::Set,
            Command::MSet { .. } => Verb::MSet,
            Command::Del { .. } => Verb::Del,
            Command::DbSize => Verb::DbSize,
            Command::Keys => Verb::Keys,
        }
    }

    /// Runs the command against the engine.
    pub fn execute<E: KvEngine + ?Sized>(self, engine: &E) -> Reply {
        match self {
            Command::Get { key } => Reply::Value(engine.get(&key)),
            Command::MGet { keys } => Reply::Values(engine.multi_get(&keys)),
            Command::Set { key, value } => {
                engine.set(key, value);
                Reply::Ok
            }
            Command::MSet { pairs } => {
                engine.multi_set(pairs);
                Reply::Ok
            }
            Command::Del { key } => {
                engine.delete(&key);
                Reply::Ok
            }
            Command::DbSize => Reply::Size(engine.len()),
            Command::Keys => Reply::Keys(engine.keys()),
        }
    }
}

fn check_arity(verb: Verb, count: usize) -> ProtocolResult<()> {
    let too_few = count < verb.min_args();
    let too_many = verb.max_args().is_some_and(|max| count > max);
    if too_few || too_many {
        return Err(ProtocolError::WrongArity {
            verb,
            required: verb.min_args(),
        });
    }
    if verb == Verb::MSet && count % 2 != 0 {
        return Err(ProtocolError::UnpairedArguments { verb });
    }
    Ok(())
}

fn checked_key(key: String) -> ProtocolResult<String> {
    validate_key(&key).map_err(|_| ProtocolError::InvalidKey)?;
    Ok(key)
}

fn checked_value(value: String) -> ProtocolResult<String> {
    validate_value(&value).map_err(|_| ProtocolError::InvalidValue)?;
    Ok(value)
}

fn next_key(args: &mut impl Iterator<Item = String>) -> ProtocolResult<String> {
    // Arity was checked first, so a missing token cannot happen here.
    checked_key(args.next().unwrap_or_default())
}

impl Reply {
    /// Returns true for `UNKNOWN` and `ERR` replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Appends the newline-terminated reply lines to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::Ok => push_line(out, RESPONSE_OK),
            Reply::Value(value) => push_value(out, value.as_deref()),
            Reply::Values(values) => {
                for value in values {
                    push_value(out, value.as_deref());
                }
            }
            Reply::Size(size) => push_line(out, &size.to_string()),
            Reply::Keys(keys) => {
                for key in keys {
                    push_line(out, key);
                }
            }
            Reply::Error(err) if err.is_unknown_command() => push_line(out, RESPONSE_UNKNOWN),
            Reply::Error(err) => {
                out.extend_from_slice(ERROR_PREFIX.as_bytes());
                push_line(out, &err.to_string());
            }
        }
    }
}

fn push_line(out: &mut BytesMut, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\n");
}

fn push_value(out: &mut BytesMut, value: Option<&str>) {
    push_line(out, value.unwrap_or(RESPONSE_NULL));
}

/// Parses and executes one request line.
pub fn dispatch<E: KvEngine + ?Sized>(engine: &E, line: &[u8]) -> Reply {
    match Command::parse_bytes(line) {
        Ok(command) => command.execute(engine),
        Err(err) => {
            debug!(error = %err, "rejected request");
            Reply::Error(err)
        }
    }
}
