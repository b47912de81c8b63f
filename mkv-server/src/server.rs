//! # Connection Handling
//!
//! Accept loop and per-client request/response loop.
//!
//! ## Design Principles
//!
//! 1. **Task per Connection**: The accept loop only spawns; it never awaits a
//!    client's work.
//! 2. **Strict Request/Response**: A handler reads one line, writes the whole
//!    reply, then reads the next line.
//! 3. **Fail-Open Defaults**: I/O errors end the affected connection only.
//! 4. **No Locks Across Awaits**: The engine is only touched inside
//!    `dispatch`, which is synchronous.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use mkv_engine::MemoryEngine;

use crate::command;
use crate::metrics::Metrics;

/// Pending connections the kernel may queue before `accept`.
const LISTEN_BACKLOG: i32 = 1024;

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const LINE_CAPACITY: usize = 256;

/// Everything a connection needs, built once at startup.
pub struct Context {
    engine: Arc<MemoryEngine>,
    metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(engine: Arc<MemoryEngine>, metrics: Arc<Metrics>) -> Self {
        Context { engine, metrics }
    }

    pub fn engine(&self) -> &MemoryEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Binds a reusable listening socket.
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Accepts connections until `shutdown` resolves.
///
/// Handlers already running are left to finish on their own.
pub async fn serve<F>(listener: TcpListener, ctx: Arc<Context>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested, no longer accepting connections");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, ctx).await {
                            debug!(%peer, error = %err, "connection closed with error");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Serves one client until it disconnects or an I/O error occurs.
pub async fn handle_connection(stream: TcpStream, ctx: Arc<Context>) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;
    let _connection = ctx.metrics().connection_opened();
    debug!(%peer, "client connected");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(LINE_CAPACITY);
    let mut out = BytesMut::with_capacity(LINE_CAPACITY);

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            debug!(%peer, "client disconnected");
            return Ok(());
        }
        if line.last() != Some(&b'\n') {
            debug!(%peer, bytes = line.len(), "dropping unterminated line at eof");
            return Ok(());
        }

        let started = Instant::now();
        ctx.metrics().record_request_start();
        let reply = command::dispatch(ctx.engine(), &line);
        if reply.is_error() {
            ctx.metrics().record_error();
        }
        out.clear();
        reply.encode(&mut out);
        ctx.metrics().record_request_end(started.elapsed());

        writer.write_all(&out).await?;
    }
}
