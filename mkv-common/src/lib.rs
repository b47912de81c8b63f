// mkv-common - Shared types and protocol definitions for MiniKV
//
// This crate defines the line protocol spoken between the server and clients

pub mod error;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use types::*;
