//! # MiniKV Server
//!
//! Line-protocol TCP front end for the in-memory engine, plus the snapshot
//! persistence loop.

pub mod command;
pub mod config;
pub mod metrics;
pub mod persistence;
pub mod server;

pub use command::{dispatch, Command, Reply};
pub use config::ServerConfig;
pub use metrics::Metrics;
pub use persistence::{Persistence, SaveReport, SnapshotterHandle};
pub use server::Context;
