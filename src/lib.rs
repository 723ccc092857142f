//! Z.AI capability front end
//!
//! Invokes remote AI capabilities (web search, page reading, repository
//! search, vision) for coding agents, over either direct HTTP calls or a
//! child-process Model Context Protocol server.
//!
//! # Architecture
//!
//! - **Transport table**: capability id → stdio command or HTTP endpoint
//! - **Deadlines**: connect and per-call limits around every await on I/O
//! - **Stdio sessions**: spawn, handshake, call, and tear down an MCP server
//! - **HTTP invoker**: one exchange, JSON or event-stream bodies normalized
//! - **Retry policy**: capped exponential backoff, blind or predicate-gated
//! - **Dispatcher**: the façade combining all of the above
//!
//! # Modules
//!
//! - [`dispatcher`]: capability requests and the dispatch façade
//! - [`transport`]: transport descriptors and the capability table
//! - [`mcp`]: MCP stdio client, protocol types, override file
//! - [`http`]: HTTP invoker and response body decoding
//! - [`deadline`], [`retry`]: timing policies
//! - [`error`]: the typed error taxonomy

#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::default_trait_access)]

pub mod config;
pub mod deadline;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod mcp;
pub mod output;
pub mod retry;
pub mod telemetry;
pub mod transport;

pub use dispatcher::{CapabilityRequest, Dispatcher};
pub use error::DispatchError;
pub use mcp::types::NormalizedResult;
