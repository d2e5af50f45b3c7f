//! # Glimpse Core
//!
//! Domain types, traits, and error definitions for the Glimpse terminal
//! research agent. This crate has **no I/O of its own**: it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external capability (language model, search backend) is a trait
//! here. Implementations live in their respective crates, which keeps the
//! orchestration loop testable with scripted stand-ins.

pub mod error;
pub mod message;
pub mod provider;
pub mod search;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, SearchError, StorageError, ToolError};
pub use message::{ContentPart, Role, Turn, TurnContent};
pub use provider::{Provider, ProviderRequest, ProviderResponse, RawToolCall, StreamChunk, Usage};
pub use search::{SearchBackend, SearchOptions, SearchResult};
pub use tool::{ToolInvocation, ToolKind, ToolResult};
