//! Capability → transport resolution.
//!
//! A [`TransportTable`] is plain data: it holds no sockets or processes and is
//! built once, then handed to the [`Dispatcher`](crate::dispatcher::Dispatcher).

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Context;
use url::Url;

use crate::config::AppConfig;
use crate::error::{DispatchError, Result};
use crate::mcp::config::{CapabilityEntry, CapabilityFile, expand_env_map, expand_env_placeholders};

/// Tools served by the vision protocol server.
pub const VISION_TOOLS: &[&str] = &[
    "image_analysis",
    "extract_text_from_screenshot",
    "diagnose_error_screenshot",
    "understand_technical_diagram",
    "analyze_data_visualization",
    "ui_to_artifact",
    "ui_diff_check",
    "video_analysis",
];

/// A locally spawned protocol server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioTarget {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// How arguments are placed in an HTTP request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFraming {
    /// The arguments object is the body.
    Plain,
    /// The call is wrapped in a JSON-RPC `tools/call` request.
    ToolCall,
}

/// A remote HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub framing: HttpFraming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportDescriptor {
    Stdio(StdioTarget),
    Http(HttpTarget),
}

impl fmt::Display for TransportDescriptor {
    /// Describes the transport without header or environment values.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio(target) => {
                write!(f, "stdio: {}", target.command)?;
                for arg in &target.args {
                    write!(f, " {arg}")?;
                }
                if !target.env.is_empty() {
                    let names: Vec<&str> = target.env.keys().map(String::as_str).collect();
                    write!(f, " (env: {})", names.join(", "))?;
                }
                Ok(())
            }
            Self::Http(target) => {
                let framing = match target.framing {
                    HttpFraming::Plain => "json",
                    HttpFraming::ToolCall => "tools/call",
                };
                write!(f, "http: {} ({framing})", target.url)
            }
        }
    }
}

/// Where a capability goes and which remote tool name it uses there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub tool: String,
    pub transport: TransportDescriptor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportTable {
    routes: BTreeMap<String, Route>,
}

impl TransportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, capability_id: impl Into<String>, route: Route) -> Self {
        self.routes.insert(capability_id.into(), route);
        self
    }

    /// The vendor's capabilities, authenticated with the configured key.
    pub fn builtin(cfg: &AppConfig) -> anyhow::Result<Self> {
        let base = cfg.api.base_url.trim_end_matches('/');
        let auth = BTreeMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", cfg.api.api_key),
        )]);

        let http = |path: &str, tool: &str, framing: HttpFraming| -> anyhow::Result<Route> {
            let url = Url::parse(&format!("{base}/{path}"))
                .with_context(|| format!("invalid API base URL: {base}"))?;
            Ok(Route {
                tool: tool.to_string(),
                transport: TransportDescriptor::Http(HttpTarget {
                    url,
                    headers: auth.clone(),
                    framing,
                }),
            })
        };

        let mut table = Self::new()
            .with_route("search", http("paas/v4/web_search", "web_search", HttpFraming::Plain)?)
            .with_route("read", http("paas/v4/reader", "reader", HttpFraming::Plain)?)
            .with_route("repo_search", http("mcp/zread/mcp", "search_doc", HttpFraming::ToolCall)?)
            .with_route(
                "repo_tree",
                http("mcp/zread/mcp", "get_repo_structure", HttpFraming::ToolCall)?,
            )
            .with_route("repo_read", http("mcp/zread/mcp", "read_file", HttpFraming::ToolCall)?);

        let vision = StdioTarget {
            command: cfg.vision.command.clone(),
            args: cfg.vision.args.clone(),
            env: BTreeMap::from([
                ("Z_AI_API_KEY".to_string(), cfg.api.api_key.clone()),
                ("Z_AI_MODE".to_string(), cfg.api.mode.clone()),
            ]),
        };
        for tool in VISION_TOOLS {
            table = table.with_route(
                *tool,
                Route {
                    tool: (*tool).to_string(),
                    transport: TransportDescriptor::Stdio(vision.clone()),
                },
            );
        }

        Ok(table)
    }

    /// Add or replace routes from an override file, expanding `${VAR}`
    /// placeholders in URLs, header values and environment values.
    pub fn with_overrides(mut self, file: CapabilityFile) -> anyhow::Result<Self> {
        for (id, entry) in file.capabilities {
            let route = match entry {
                CapabilityEntry::Stdio {
                    command,
                    args,
                    env,
                    tool,
                } => Route {
                    tool: tool.unwrap_or_else(|| id.clone()),
                    transport: TransportDescriptor::Stdio(StdioTarget {
                        command,
                        args,
                        env: expand_env_map(&env),
                    }),
                },
                CapabilityEntry::Http {
                    url,
                    headers,
                    rpc,
                    tool,
                } => {
                    let url = Url::parse(&expand_env_placeholders(&url))
                        .with_context(|| format!("invalid url for capability '{id}': {url}"))?;
                    Route {
                        tool: tool.unwrap_or_else(|| id.clone()),
                        transport: TransportDescriptor::Http(HttpTarget {
                            url,
                            headers: expand_env_map(&headers),
                            framing: if rpc {
                                HttpFraming::ToolCall
                            } else {
                                HttpFraming::Plain
                            },
                        }),
                    }
                }
            };
            self.routes.insert(id, route);
        }
        Ok(self)
    }

    /// Look up a capability. Pure; performs no I/O.
    pub fn resolve(&self, capability_id: &str) -> Result<&Route> {
        self.routes
            .get(capability_id)
            .ok_or_else(|| DispatchError::UnsupportedCapability(capability_id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Route)> {
        self.routes.iter().map(|(id, route)| (id.as_str(), route))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, RetryConfig, TimeoutConfig, VisionConfig};

    fn app_config() -> AppConfig {
        AppConfig {
            api: ApiConfig {
                api_key: "test-key".into(),
                mode: "ZAI".into(),
                base_url: "https://api.z.ai/api/".into(),
            },
            timeouts: TimeoutConfig {
                connect_ms: 30_000,
                call_ms: 120_000,
            },
            retry: RetryConfig { count: 0 },
            vision: VisionConfig {
                command: "npx".into(),
                args: vec!["-y".into(), "@z_ai/mcp-server".into()],
            },
            capabilities_file: None,
        }
    }

    #[test]
    fn test_builtin_routes() {
        let table = TransportTable::builtin(&app_config()).unwrap();

        let search = table.resolve("search").unwrap();
        match &search.transport {
            TransportDescriptor::Http(target) => {
                assert_eq!(target.url.as_str(), "https://api.z.ai/api/paas/v4/web_search");
                assert_eq!(target.headers["Authorization"], "Bearer test-key");
                assert_eq!(target.framing, HttpFraming::Plain);
            }
            other => panic!("expected http, got {other:?}"),
        }

        let repo = table.resolve("repo_tree").unwrap();
        assert_eq!(repo.tool, "get_repo_structure");

        let vision = table.resolve("image_analysis").unwrap();
        match &vision.transport {
            TransportDescriptor::Stdio(target) => {
                assert_eq!(target.command, "npx");
                assert_eq!(target.env["Z_AI_API_KEY"], "test-key");
                assert_eq!(target.env["Z_AI_MODE"], "ZAI");
            }
            other => panic!("expected stdio, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_capability() {
        let table = TransportTable::builtin(&app_config()).unwrap();
        let err = table.resolve("chat").unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedCapability(id) if id == "chat"));
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let file: CapabilityFile = serde_json::from_str(
            r#"{
                "capabilities": {
                    "search": { "url": "http://127.0.0.1:9/search" },
                    "echo": { "command": "cat", "tool": "echo_tool" }
                }
            }"#,
        )
        .unwrap();
        let table = TransportTable::builtin(&app_config())
            .unwrap()
            .with_overrides(file)
            .unwrap();

        match &table.resolve("search").unwrap().transport {
            TransportDescriptor::Http(target) => {
                assert_eq!(target.url.as_str(), "http://127.0.0.1:9/search");
                assert!(target.headers.is_empty());
            }
            other => panic!("expected http, got {other:?}"),
        }
        assert_eq!(table.resolve("echo").unwrap().tool, "echo_tool");
    }

    #[test]
    fn test_display_hides_secrets() {
        let table = TransportTable::builtin(&app_config()).unwrap();
        for (_, route) in table.iter() {
            assert!(!route.transport.to_string().contains("test-key"));
        }
    }
}
