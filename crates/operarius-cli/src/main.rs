//! Command-line interface for the Operarius gateway.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use operarius_core::config::env_vars;
use operarius_core::{Envelope, Gateway, GatewayConfig};
use operarius_extensions::builtin_catalog;
use operarius_tools::ToolRegistryBuilder;
use serde::Serialize;
use serde_json::Value;

/// Operarius - local gateway for extensions and built-in tools.
#[derive(Parser, Debug)]
#[command(name = "operarius")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Extension commands.
    Extensions {
        #[command(subcommand)]
        cmd: ExtensionsCommand,
    },
    /// Built-in tool commands.
    Tools {
        #[command(subcommand)]
        cmd: ToolsCommand,
    },
    /// Hook commands.
    Hook {
        #[command(subcommand)]
        cmd: HookCommand,
    },
    /// Show the health report.
    Health,
    /// Print metrics in Prometheus text format.
    Metrics,
}

#[derive(Subcommand, Debug)]
enum ExtensionsCommand {
    /// List loaded extensions and their methods.
    List,
    /// Invoke one extension method.
    Invoke {
        /// Extension name.
        name: String,
        /// Method name.
        method: String,
        /// Parameters as a JSON object.
        #[arg(short, long)]
        params: Option<String>,
    },
    /// Invoke a method on every extension that exposes it.
    InvokeAll {
        /// Method name.
        method: String,
        /// Parameters as a JSON object.
        #[arg(short, long)]
        params: Option<String>,
    },
    /// Reload one extension from its manifest.
    Reload {
        /// Extension name.
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// List tools.
    List {
        /// Include parameter schemas.
        #[arg(long)]
        schema: bool,
    },
    /// Run a tool.
    Run {
        /// Tool name.
        name: String,
        /// Arguments as a JSON object.
        #[arg(short, long)]
        params: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum HookCommand {
    /// Run a hook pipeline over a payload.
    Run {
        /// Hook name, e.g. pre-processing.
        hook: String,
        /// Payload as JSON.
        #[arg(short, long)]
        payload: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = GatewayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let tools = ToolRegistryBuilder::new(config.tools.clone())
        .with_default_tools()
        .build();
    let gateway = Gateway::builder(config)
        .with_catalog(builtin_catalog())
        .with_tools(Arc::new(tools))
        .build()
        .context("Failed to build gateway")?;

    let report = gateway.start().await;
    for failure in &report.failed {
        tracing::warn!(extension = %failure.name, kind = %failure.kind, error = %failure.error, "Extension failed to load");
    }

    let outcome = run(&gateway, args.command).await;
    gateway.shutdown().await;

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    // JSON format for production/container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let default = if verbose { "operarius=debug" } else { "operarius=warn" };
        tracing_subscriber::EnvFilter::new(default)
    });

    // Logs go to stderr; stdout carries command output.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

/// Run a command. `Ok(false)` means it completed with a failure envelope.
async fn run(gateway: &Gateway, command: Command) -> Result<bool> {
    match command {
        Command::Extensions { cmd } => match cmd {
            ExtensionsCommand::List => print_json(&gateway.list_extensions().await),
            ExtensionsCommand::Invoke { name, method, params } => {
                let params = parse_json("params", params)?;
                let envelope = gateway.process_request(&name, &method, params).await;
                print_envelope(&envelope)
            }
            ExtensionsCommand::InvokeAll { method, params } => {
                let params = parse_json("params", params)?;
                let envelopes = gateway.invoke_all(&method, params).await;
                print_json(&envelopes)?;
                Ok(envelopes.iter().all(Envelope::is_success))
            }
            ExtensionsCommand::Reload { name } => {
                let listing = gateway.reload_extension(&name).await?;
                print_json(&listing)
            }
        },
        Command::Tools { cmd } => match cmd {
            ToolsCommand::List { schema: true } => print_json(&gateway.tool_definitions()),
            ToolsCommand::List { schema: false } => print_json(&gateway.list_tools()),
            ToolsCommand::Run { name, params } => {
                let params = parse_json("params", params)?;
                let envelope = gateway.invoke_tool(&name, params).await;
                print_envelope(&envelope)
            }
        },
        Command::Hook { cmd } => match cmd {
            HookCommand::Run { hook, payload } => {
                let payload = parse_json("payload", payload)?;
                print_json(&gateway.run_hook(&hook, payload).await)
            }
        },
        Command::Health => print_json(&gateway.monitoring().health_status()),
        Command::Metrics => {
            print!("{}", gateway.monitoring().prometheus_text()?);
            Ok(true)
        }
    }
}

fn parse_json(flag: &str, raw: Option<String>) -> Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(&raw).with_context(|| format!("--{flag} is not valid JSON")),
        None => Ok(Value::Object(Default::default())),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(true)
}

fn print_envelope(envelope: &Envelope) -> Result<bool> {
    print_json(envelope)?;
    Ok(envelope.is_success())
}
