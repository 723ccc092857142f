//! `zai` command-line entry point.

use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tracing::info;

use zai_cli::{
    CapabilityRequest, DispatchError, Dispatcher, NormalizedResult,
    config::{AppConfig, ConfigArgs},
    dispatcher::{ReadOptions, RepoSearchOptions, SearchOptions},
    output::{OutputFormat, render_result, render_tools},
    telemetry,
};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "zai", author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t, global = true)]
    output: OutputFormat,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the web
    Search {
        query: String,
        /// Number of results (1-50)
        #[arg(long)]
        count: Option<u32>,
        /// Restrict results to a domain
        #[arg(long)]
        domain: Option<String>,
        /// oneDay, oneWeek, oneMonth, oneYear or noLimit
        #[arg(long)]
        recency: Option<String>,
        /// medium or high
        #[arg(long)]
        content_size: Option<String>,
    },
    /// Read a web page as markdown or text
    Read {
        url: String,
        /// markdown or text
        #[arg(long)]
        format: Option<String>,
        /// Drop images from the page content
        #[arg(long)]
        no_images: bool,
        /// Bypass the server-side page cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Search and browse GitHub repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },
    /// Run a vision tool on an image or video
    Vision {
        /// Tool name, e.g. image_analysis
        tool: String,
        /// Local path or URL
        source: String,
        #[arg(long, default_value = "Describe this image in detail.")]
        prompt: String,
    },
    /// List tools exposed behind a capability
    Tools {
        #[arg(default_value = "image_analysis")]
        capability: String,
    },
    /// Invoke any capability with raw JSON arguments
    Call {
        capability: String,
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Show the capability table
    Capabilities,
}

#[derive(Subcommand, Debug)]
enum RepoCommand {
    /// Search a repository's documentation and code
    Search {
        /// owner/name
        repo: String,
        query: String,
        #[arg(long)]
        language: Option<String>,
    },
    /// Show a repository's directory structure
    Tree {
        repo: String,
        #[arg(long)]
        path: Option<String>,
    },
    /// Read one file from a repository
    Read { repo: String, path: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env (if present) before clap reads env-backed flags.
    let _ = dotenv();
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<DispatchError>()
                .map_or(1, DispatchError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = AppConfig::load(&cli.config)?;
    if !matches!(cli.command, Command::Capabilities) {
        cfg.require_api_key()?;
    }

    let dispatcher = Dispatcher::from_config(&cfg)?.inherit_stderr(cli.verbose > 0);
    info!(
        name: "config.loaded",
        capabilities = dispatcher.table().len(),
        retries = cfg.retry.count,
        mode = %cfg.api.mode,
        "configuration loaded"
    );

    let format = cli.output;
    let result = match cli.command {
        Command::Search {
            query,
            count,
            domain,
            recency,
            content_size,
        } => {
            dispatcher
                .search(SearchOptions {
                    query,
                    count,
                    domain_filter: domain,
                    recency_filter: recency,
                    content_size,
                })
                .await?
        }
        Command::Read {
            url,
            format: return_format,
            no_images,
            no_cache,
        } => {
            dispatcher
                .read(ReadOptions {
                    url,
                    return_format,
                    retain_images: no_images.then_some(false),
                    no_cache: no_cache.then_some(true),
                    timeout_secs: None,
                })
                .await?
        }
        Command::Repo { command } => match command {
            RepoCommand::Search {
                repo,
                query,
                language,
            } => {
                dispatcher
                    .repo_search(RepoSearchOptions {
                        repo,
                        query,
                        language,
                    })
                    .await?
            }
            RepoCommand::Tree { repo, path } => {
                dispatcher.repo_tree(&repo, path.as_deref()).await?
            }
            RepoCommand::Read { repo, path } => dispatcher.repo_read(&repo, &path).await?,
        },
        Command::Vision {
            tool,
            source,
            prompt,
        } => dispatcher.vision(&tool, &source, &prompt).await?,
        Command::Tools { capability } => {
            let tools = dispatcher.list_tools(&capability).await?;
            println!("{}", render_tools(&tools, format));
            return Ok(ExitCode::SUCCESS);
        }
        Command::Call { capability, args } => {
            let arguments: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {e}"))?;
            let request = CapabilityRequest::from_value(capability, arguments)?;
            dispatcher
                .dispatch_with_retry(&request, &dispatcher.retry_policy())
                .await?
        }
        Command::Capabilities => {
            for (id, route) in dispatcher.table().iter() {
                println!("{id}\t{}\t{}", route.tool, route.transport);
            }
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(print_result(&result, format))
}

/// A remote tool error is printed like any other result but fails the process.
fn print_result(result: &NormalizedResult, format: OutputFormat) -> ExitCode {
    let rendered = render_result(result, format);
    if result.is_error {
        eprintln!("{rendered}");
        ExitCode::FAILURE
    } else {
        println!("{rendered}");
        ExitCode::SUCCESS
    }
}
