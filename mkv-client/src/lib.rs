//! # MiniKV Client
//!
//! Async client for the MiniKV line protocol.
//!
//! ## Design Principles
//!
//! 1. **Validate Locally**: Keys and values are checked before anything is
//!    sent, so well-formed calls never provoke an `ERR` reply.
//! 2. **One Request at a Time**: Each call writes one line and reads exactly
//!    the number of reply lines that request produces.
//! 3. **Quote Transparently**: Arguments are quoted only when the tokenizer
//!    would otherwise split or drop them.
//!
//! ## Notes
//! - A stored value spelled `NULL` reads back as `None`; the protocol has no
//!   way to tell them apart.
//! - `KEYS` carries no length prefix, so the caller supplies the count it
//!   expects (usually from `dbsize`).

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use mkv_common::{
    encode_request, validate_key, KeyError, Value, Verb, ERROR_PREFIX, RESPONSE_NULL,
    RESPONSE_OK, RESPONSE_UNKNOWN,
};

/// Result type for client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("server closed the connection")]
    Closed,

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] KeyError),

    #[error("server error: {0}")]
    Server(String),

    #[error("server does not support the command")]
    UnknownCommand,

    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(String),
}

/// One connection to a MiniKV server.
pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

impl Client {
    /// Opens a connection.
    pub async fn connect(addr: impl ToSocketAddrs) -> ClientResult<Client> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Client {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
        })
    }

    /// Sends `request` verbatim and reads `lines` reply lines.
    ///
    /// No validation or error interpretation happens here.
    pub async fn raw(&mut self, request: &str, lines: usize) -> ClientResult<Vec<String>> {
        self.send(request).await?;
        let mut replies = Vec::with_capacity(lines);
        for _ in 0..lines {
            replies.push(self.read_line().await?);
        }
        Ok(replies)
    }

    /// `GET key`
    pub async fn get(&mut self, key: &str) -> ClientResult<Option<String>> {
        validate_key(key)?;
        self.send(&encode_request(Verb::Get, [key])).await?;
        Ok(into_value(self.read_line().await?))
    }

    /// `MGET key...`, one entry per key in request order.
    pub async fn mget(&mut self, keys: &[&str]) -> ClientResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        for key in keys {
            validate_key(key)?;
        }
        self.send(&encode_request(Verb::MGet, keys)).await?;

        let mut values = Vec::with_capacity(keys.len());
        for _ in keys {
            values.push(into_value(self.read_line().await?));
        }
        Ok(values)
    }

    /// `SET key value`
    pub async fn set(&mut self, key: &str, value: &str) -> ClientResult<()> {
        validate_key(key)?;
        Value::new(value)?;
        self.send(&encode_request(Verb::Set, [key, value])).await?;
        self.expect_ok().await
    }

    /// `MSET key value [key value ...]`
    pub async fn mset(&mut self, pairs: &[(&str, &str)]) -> ClientResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        for (key, value) in pairs {
            validate_key(key)?;
            Value::new(*value)?;
        }
        let args = pairs.iter().flat_map(|(key, value)| [*key, *value]);
        self.send(&encode_request(Verb::MSet, args)).await?;
        self.expect_ok().await
    }

    /// `DEL key`
    pub async fn del(&mut self, key: &str) -> ClientResult<()> {
        validate_key(key)?;
        self.send(&encode_request(Verb::Del, [key])).await?;
        self.expect_ok().await
    }

    /// `DBSIZE`
    pub async fn dbsize(&mut self) -> ClientResult<usize> {
        self.send(Verb::DbSize.as_str()).await?;
        let line = self.read_line().await?;
        match line.parse() {
            Ok(size) => Ok(size),
            Err(_) => Err(classify(line)),
        }
    }

    /// `KEYS`, reading exactly `count` lines.
    pub async fn keys_expecting(&mut self, count: usize) -> ClientResult<Vec<String>> {
        self.raw(Verb::Keys.as_str(), count).await
    }

    async fn send(&mut self, request: &str) -> ClientResult<()> {
        let mut frame = Vec::with_capacity(request.len() + 1);
        frame.extend_from_slice(request.as_bytes());
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    async fn read_line(&mut self) -> ClientResult<String> {
        self.line.clear();
        if self.reader.read_line(&mut self.line).await? == 0 {
            return Err(ClientError::Closed);
        }
        let trimmed = self.line.trim_end_matches(['\r', '\n']);
        Ok(trimmed.to_string())
    }

    async fn expect_ok(&mut self) -> ClientResult<()> {
        let line = self.read_line().await?;
        if line == RESPONSE_OK {
            Ok(())
        } else {
            Err(classify(line))
        }
    }
}

fn into_value(line: String) -> Option<String> {
    if line == RESPONSE_NULL { None } else { Some(line) }
}

fn classify(line: String) -> ClientError {
    if line == RESPONSE_UNKNOWN {
        return ClientError::UnknownCommand;
    }
    match line.strip_prefix(ERROR_PREFIX) {
        Some(reason) => ClientError::Server(reason.to_string()),
        None => ClientError::UnexpectedReply(line),
    }
}
