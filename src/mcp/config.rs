use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Capability override file.
///
/// ```json
/// {
///   "capabilities": {
///     "vision_local": {
///       "command": "node",
///       "args": ["./vision-server.js"],
///       "env": { "Z_AI_API_KEY": "${Z_AI_API_KEY}" },
///       "tool": "image_analysis"
///     },
///     "search": {
///       "url": "https://proxy.internal/web_search",
///       "headers": { "Authorization": "Bearer ${Z_AI_API_KEY}" }
///     }
///   }
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CapabilityFile {
    #[serde(default)]
    pub capabilities: BTreeMap<String, CapabilityEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum CapabilityEntry {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        tool: Option<String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// Wrap calls in a JSON-RPC `tools/call` envelope.
        #[serde(default)]
        rpc: bool,
        #[serde(default)]
        tool: Option<String>,
    },
}

pub fn load_capability_file(path: impl AsRef<Path>) -> anyhow::Result<CapabilityFile> {
    let txt = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&txt)?)
}

/// Expand `${VAR}` placeholders from the process environment.
///
/// Unknown variables are left in place so the failure shows up at the remote
/// end with the placeholder visible.
pub fn expand_env_placeholders(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

pub fn expand_env_map(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
