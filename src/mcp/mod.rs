//! Model Context Protocol (MCP) client pieces.
//!
//! - [`stdio_client`]: one-shot sessions with a locally spawned MCP server
//!   speaking newline-delimited JSON-RPC over stdin/stdout.
//! - [`types`]: tool descriptors and the normalized call result.
//! - [`config`]: the capability override file (`capabilities.json`).
//!
//! # Configuration
//!
//! ```json
//! {
//!   "capabilities": {
//!     "vision": {
//!       "command": "npx",
//!       "args": ["-y", "@z_ai/mcp-server"],
//!       "env": { "Z_AI_API_KEY": "${Z_AI_API_KEY}", "Z_AI_MODE": "ZAI" },
//!       "tool": "image_analysis"
//!     },
//!     "docs": {
//!       "url": "https://api.z.ai/api/mcp/zread/mcp",
//!       "headers": { "Authorization": "Bearer ${Z_AI_API_KEY}" },
//!       "rpc": true,
//!       "tool": "search_doc"
//!     }
//!   }
//! }
//! ```

pub mod config;
pub mod stdio_client;
pub mod types;
