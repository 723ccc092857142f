use crate::deadline::Deadlines;
use crate::retry::RetryPolicy;
use clap::Args;
use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_API_BASE: &str = "https://api.z.ai/api";
pub const DEFAULT_MODE: &str = "ZAI";

/// Configuration flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Config file path (YAML, TOML or JSON)
    #[arg(short, long, env = "ZAI_CONFIG", global = true)]
    pub config: Option<String>,

    /// API key for the vendor endpoints
    #[arg(long, env = "Z_AI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Vendor mode passed to the vision server
    #[arg(long, env = "Z_AI_MODE", global = true)]
    pub mode: Option<String>,

    /// Retries after the first attempt for retryable failures
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Per-call deadline in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Connection deadline in milliseconds
    #[arg(long, global = true)]
    pub connect_timeout_ms: Option<u64>,

    /// Capability override file (JSON)
    #[arg(long, env = "ZAI_CAPABILITIES", global = true)]
    pub capabilities: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub vision: VisionConfig,
    #[serde(default)]
    pub capabilities_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub api_key: String,
    pub mode: String,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub call_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    pub count: u32,
}

/// How to launch the vision protocol server.
#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl AppConfig {
    /// Priority: CLI flag > CLI env var > `ZAI_` env > config file > defaults.
    pub fn load(args: &ConfigArgs) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("api.mode", DEFAULT_MODE)?
            .set_default("api.base_url", DEFAULT_API_BASE)?
            .set_default("timeouts.connect_ms", 30_000)?
            .set_default("timeouts.call_ms", 120_000)?
            .set_default("retry.count", 0)?
            .set_default("vision.command", "npx")?
            .set_default("vision.args", vec!["-y", "@z_ai/mcp-server"])?;

        builder = match &args.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("zai").required(false)),
        };

        // E.g. ZAI_TIMEOUTS__CALL_MS=60000
        builder = builder.add_source(
            Environment::with_prefix("ZAI")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(key) = &args.api_key {
            builder = builder.set_override("api.api_key", key.as_str())?;
        }
        if let Some(mode) = &args.mode {
            builder = builder.set_override("api.mode", mode.as_str())?;
        }
        if let Some(retries) = args.retries {
            builder = builder.set_override("retry.count", retries)?;
        }
        if let Some(ms) = args.timeout_ms {
            builder = builder.set_override("timeouts.call_ms", ms)?;
        }
        if let Some(ms) = args.connect_timeout_ms {
            builder = builder.set_override("timeouts.connect_ms", ms)?;
        }
        if let Some(path) = &args.capabilities {
            builder = builder.set_override("capabilities_file", path.as_str())?;
        }

        builder.build()?.try_deserialize()
    }

    /// The API key, or an error naming where it is expected.
    pub fn require_api_key(&self) -> anyhow::Result<&str> {
        let key = self.api.api_key.trim();
        if key.is_empty() {
            anyhow::bail!("Missing API key: set Z_AI_API_KEY or pass --api-key");
        }
        Ok(key)
    }

    pub fn deadlines(&self) -> Deadlines {
        Deadlines::from_millis(self.timeouts.connect_ms, self.timeouts.call_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.count)
    }
}
