//! Execution backend: the sandbox side of tool execution.
//!
//! This module handles:
//! - The name-indexed tool registry and dispatch table
//! - Built-in tool handlers, one per request family
//! - The HTTP+JSON transport to the sandbox backend
//!
//! The executor only sees `ToolRegistry::dispatch(name, params, ctx)`; the
//! wire format stays behind `BackendTransport`.

pub mod client;
pub mod errors;
pub mod registry;
pub mod tools;
pub mod types;

// Re-exports for convenience
pub use client::{BackendTransport, HttpBackend};
pub use errors::BackendError;
pub use registry::{RegisteredTool, ToolHandler, ToolRegistry};
pub use tools::register_builtin_tools;
pub use types::{ExecutionContext, ToolDescriptor};
