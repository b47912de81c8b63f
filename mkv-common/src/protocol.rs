//! # Line Protocol
//!
//! Purpose: Define the request/response vocabulary shared by the server and
//! the client.
//!
//! ## Design Principles
//!
//! 1. **Static Verb Set**: Verbs are a closed enum, so dispatch is a `match`
//!    and error text lists the compile-time verb table.
//! 2. **One Line In, Lines Out**: A request is one `\n`-terminated line; a
//!    response is one or more `\n`-terminated lines.
//! 3. **Quoting Only When Needed**: Bare tokens are literal; double quotes are
//!    only required for empty arguments and arguments containing whitespace.
//!
//! ## Framing Example
//!
//! ```text
//! request:   MSET alpha 1 greeting "hello world"\n
//! response:  OK\n
//!
//! request:   MGET alpha missing greeting\n
//! response:  1\n
//!            NULL\n
//!            hello world\n
//! ```

use core::fmt;

use crate::error::{ProtocolError, ProtocolResult};

/// Reply line for successful mutations.
pub const RESPONSE_OK: &str = "OK";

/// Reply line for a missing key.
pub const RESPONSE_NULL: &str = "NULL";

/// Reply line for an unrecognized verb.
pub const RESPONSE_UNKNOWN: &str = "UNKNOWN";

/// Prefix of every error reply line (`ERR <reason>`).
pub const ERROR_PREFIX: &str = "ERR ";

/// Comma-separated list of supported verbs, in `Verb::ALL` order.
pub const SUPPORTED_VERBS: &str = "GET, MGET, SET, MSET, DEL, DBSIZE, KEYS";

/// Request verbs understood by the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Verb {
    /// `GET key`
    Get,
    /// `MGET key [key ...]`
    MGet,
    /// `SET key value`
    Set,
    /// `MSET key value [key value ...]`
    MSet,
    /// `DEL key`
    Del,
    /// `DBSIZE`
    DbSize,
    /// `KEYS`
    Keys,
}

impl Verb {
    /// Every supported verb.
    pub const ALL: [Verb; 7] = [
        Verb::Get,
        Verb::MGet,
        Verb::Set,
        Verb::MSet,
        Verb::Del,
        Verb::DbSize,
        Verb::Keys,
    ];

    /// Returns the canonical upper-case spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::MGet => "MGET",
            Verb::Set => "SET",
            Verb::MSet => "MSET",
            Verb::Del => "DEL",
            Verb::DbSize => "DBSIZE",
            Verb::Keys => "KEYS",
        }
    }

    /// Resolves a verb token case-insensitively.
    pub fn parse(token: &str) -> Option<Verb> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(token))
    }

    /// Minimum number of arguments after the verb.
    pub const fn min_args(self) -> usize {
        match self {
            Verb::Get | Verb::MGet | Verb::Del => 1,
            Verb::Set | Verb::MSet => 2,
            Verb::DbSize | Verb::Keys => 0,
        }
    }

    /// Maximum number of arguments, or `None` when surplus tokens are
    /// accepted.
    ///
    /// Only `SET` is bounded: a third token there means an unquoted value
    /// with spaces, which would otherwise be truncated.
    pub const fn max_args(self) -> Option<usize> {
        match self {
            Verb::Set => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Between,
    Bare,
    Quoted,
    Escape,
    Closed,
}

/// Splits one request line into tokens.
///
/// Tokens are separated by ASCII whitespace. A token that starts with `"` is
/// quoted: it runs to the next unescaped `"`, and `\"` / `\\` inside it
/// decode to `"` / `\`. A trailing `\r` or `\n` is ignored.
pub fn tokenize(line: &str) -> ProtocolResult<Vec<String>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = TokenState::Between;

    for ch in line.chars() {
        state = match state {
            TokenState::Between if ch.is_ascii_whitespace() => TokenState::Between,
            TokenState::Between if ch == '"' => TokenState::Quoted,
            TokenState::Between => {
                current.push(ch);
                TokenState::Bare
            }
            TokenState::Bare if ch.is_ascii_whitespace() => {
                tokens.push(core::mem::take(&mut current));
                TokenState::Between
            }
            TokenState::Bare => {
                current.push(ch);
                TokenState::Bare
            }
            TokenState::Quoted if ch == '"' => TokenState::Closed,
            TokenState::Quoted if ch == '\\' => TokenState::Escape,
            TokenState::Quoted => {
                current.push(ch);
                TokenState::Quoted
            }
            TokenState::Escape => {
                if ch != '"' && ch != '\\' {
                    current.push('\\');
                }
                current.push(ch);
                TokenState::Quoted
            }
            TokenState::Closed if ch.is_ascii_whitespace() => {
                tokens.push(core::mem::take(&mut current));
                TokenState::Between
            }
            TokenState::Closed => return Err(ProtocolError::UnbalancedQuotes),
        };
    }

    match state {
        TokenState::Between => {}
        TokenState::Bare | TokenState::Closed => tokens.push(current),
        TokenState::Quoted | TokenState::Escape => return Err(ProtocolError::UnbalancedQuotes),
    }

    Ok(tokens)
}

/// Encodes one argument so that `tokenize` yields it back unchanged.
pub fn quote_arg(arg: &str) -> String {
    let needs_quotes =
        arg.is_empty() || arg.starts_with('"') || arg.chars().any(|ch| ch.is_ascii_whitespace());
    if !needs_quotes {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for ch in arg.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Builds a request line (without the trailing newline) from a verb and
/// arguments.
pub fn encode_request<I, S>(verb: Verb, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = String::from(verb.as_str());
    for arg in args {
        line.push(' ');
        line.push_str(&quote_arg(arg.as_ref()));
    }
    line
}
