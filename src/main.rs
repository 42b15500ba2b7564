//! dom-mcp - MCP server for declarative page markup
//!
//! Serves the tools and resources declared in one markup file over
//! JSON-RPC 2.0 on stdio.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dom_mcp::{Config, McpServer, Page};

/// MCP server for tools and resources declared in page markup.
#[derive(Parser, Debug)]
#[command(name = "dom-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Markup file declaring the tools and resources.
    #[arg(long)]
    page: PathBuf,

    /// URL reported for the page.
    #[arg(long)]
    url: Option<String>,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Milliseconds to wait for a tool response.
    #[arg(long)]
    call_timeout_ms: Option<u64>,

    /// Answer every tool call with its own arguments.
    /// Without this, calls resolve after the timeout with a placeholder.
    #[arg(long)]
    echo: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Log to stderr (not stdout, which is used for MCP protocol)
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    tracing::info!(
        "Starting {} v{}",
        dom_mcp::server::SERVER_NAME,
        dom_mcp::server::SERVER_VERSION
    );

    let server = match build_server(&args) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Startup failed: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match server.run_stdio().await {
        Ok(()) => {
            tracing::info!("Server exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_server(args: &Args) -> anyhow::Result<McpServer> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).context("loading configuration")?,
        None => Config::default(),
    };
    if let Some(timeout) = args.call_timeout_ms {
        config.invoker.call_timeout_ms = timeout;
    }

    let markup = std::fs::read_to_string(&args.page)
        .with_context(|| format!("reading page {}", args.page.display()))?;
    let url = args
        .url
        .clone()
        .unwrap_or_else(|| format!("file://{}", args.page.display()));
    let page = Arc::new(Page::new(url, &markup));

    if args.echo {
        page.on_any_call(|event| {
            let detail = serde_json::json!({
                "success": true,
                "tool": event.tool_name(),
                "arguments": event.arguments(),
            });
            event.respond(detail);
        });
        tracing::info!("Echoing tool calls");
    }

    tracing::info!(
        page = %args.page.display(),
        timeout_ms = config.invoker.call_timeout_ms,
        "Serving page"
    );

    Ok(McpServer::with_config(page, &config.invoker))
}
