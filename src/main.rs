//! CLI entry point for chatbridge.

mod cli;

use chatbridge::bridge::{BridgeClient, CacheContextRequest, PageRange, SearchCacheRequest, ToolBackend};
use chatbridge::config::{initialize_config, load_config, validate, Config, ConfigInitResult};
use chatbridge::hook::stdio;
use chatbridge::pipeline::{extract_text, RequestRewriter, RewriteStatus, TagDetector};
use chatbridge::site::SiteCatalog;
use clap::Parser;
use cli::{CacheCommand, Command, ConfigCommand, ServerCommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();
    let args = cli::Args::parse();
    if let Err(msg) = run(args).await {
        eprintln!("error: {msg}");
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries protocol lines and command output.
fn init_tracing() {
    let filter = std::env::var("CHATBRIDGE_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: cli::Args) -> Result<(), String> {
    if let Command::Init { force } = &args.command {
        return run_init(args.config.as_deref(), *force);
    }

    let loaded = load_config(args.config.as_deref()).map_err(|e| e.to_string())?;
    tracing::debug!("using config from {}", loaded.source);
    let mut config = loaded.config;
    if let Some(port) = args.port {
        config.bridge.port = port;
        validate(&config).map_err(|e| e.to_string())?;
    }
    let client = BridgeClient::new(&config.bridge);

    match args.command {
        Command::Init { .. } => Ok(()),
        Command::Serve => run_serve(config, client).await,
        Command::Health => {
            let envelope = client.health().await.map_err(|e| e.to_string())?;
            print_json(&envelope)
        }
        Command::Tools { service } => match service {
            Some(service) => {
                let tools = client.list_tools(&service).await.map_err(|e| e.to_string())?;
                print_json(&tools)
            }
            None => {
                let services = client.services().await.map_err(|e| e.to_string())?;
                print_json(&services)
            }
        },
        Command::Config { action } => run_config(&client, action).await,
        Command::Cache { action } => run_cache(&client, action).await,
        Command::Server { action } => {
            let envelope = match action {
                ServerCommand::Restart { name } => client.restart_server(&name).await,
                ServerCommand::Shutdown { name } => client.shutdown_server(&name).await,
            }
            .map_err(|e| e.to_string())?;
            print_json(&envelope)
        }
        Command::Detect { path, marker } => {
            let marker = marker.unwrap_or_else(|| config.pipeline.marker.clone());
            let detector = TagDetector::new(&marker).map_err(|e| e.to_string())?;
            let text = read_input(path.as_deref())?;
            let report = match detector.detect(&text) {
                None => json!({ "found": false }),
                Some(detection) => match detection.call {
                    Ok(call) => json!({
                        "found": true,
                        "signature": detection.signature.0,
                        "call": call,
                    }),
                    Err(err) => json!({
                        "found": true,
                        "signature": detection.signature.0,
                        "malformed": err.to_string(),
                    }),
                },
            };
            print_json(&report)
        }
        Command::Extract {
            site,
            path,
            transport,
        } => {
            let catalog = SiteCatalog::new(config.sites);
            let profile = catalog
                .by_id(&site)
                .ok_or_else(|| format!("no site profile with id `{site}`"))?;
            let mut rules = profile.response.clone();
            if let Some(transport) = transport {
                rules.transport = transport;
            }
            let raw = read_input(path.as_deref())?;
            println!("{}", extract_text(&raw, &rules));
            Ok(())
        }
        Command::Rewrite { url, path } => {
            let raw = read_input(path.as_deref())?;
            let catalog = Arc::new(SiteCatalog::new(config.sites));
            let rewriter = RequestRewriter::new(catalog, config.pipeline, Arc::new(client));
            let outcome = rewriter.rewrite(&url, &raw).await;
            match &outcome.status {
                RewriteStatus::Skipped(reason) => eprintln!("skipped: {reason}"),
                RewriteStatus::PassThrough => eprintln!("passed through unchanged"),
                RewriteStatus::Injected(kind) => eprintln!("injected: {kind:?}"),
                RewriteStatus::FailedOpen(reason) => eprintln!("failed open: {reason}"),
            }
            println!("{}", outcome.body);
            Ok(())
        }
    }
}

fn run_init(config_path: Option<&str>, force: bool) -> Result<(), String> {
    let path = config_path.map(PathBuf::from);
    match initialize_config(path.as_deref(), force).map_err(|e| e.to_string())? {
        ConfigInitResult::Created { path } => {
            println!("wrote {}", path.display());
        }
        ConfigInitResult::AlreadyInitialized { path } => {
            println!("{} already exists (use --force to replace it)", path.display());
        }
        ConfigInitResult::Overwritten { path, backup_path } => {
            println!(
                "wrote {} (previous file saved as {})",
                path.display(),
                backup_path.display()
            );
        }
    }
    Ok(())
}

async fn run_serve(config: Config, client: BridgeClient) -> Result<(), String> {
    match client.health().await {
        Ok(_) => tracing::info!("bridge reachable at {}", client.base_url()),
        Err(err) => tracing::warn!("bridge not reachable yet: {err}"),
    }
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    stdio::serve(reader, tokio::io::stdout(), config, Arc::new(client))
        .await
        .map_err(|e| e.to_string())
}

async fn run_config(client: &BridgeClient, action: ConfigCommand) -> Result<(), String> {
    match action {
        ConfigCommand::Get => {
            let config = client.get_config().await.map_err(|e| e.to_string())?;
            print_json(&config)
        }
        ConfigCommand::Set { json, file } => {
            let text = match (json, file) {
                (Some(json), _) => json,
                (None, Some(file)) => read_input(Some(&file))?,
                (None, None) => return Err("config set needs inline JSON or --file".into()),
            };
            let value: Value =
                serde_json::from_str(&text).map_err(|e| format!("invalid config JSON: {e}"))?;
            let envelope = client.set_config(&value).await.map_err(|e| e.to_string())?;
            print_json(&envelope)
        }
    }
}

async fn run_cache(client: &BridgeClient, action: CacheCommand) -> Result<(), String> {
    let value = match action {
        CacheCommand::Page {
            cache_id,
            start,
            end,
        } => {
            client
                .cache_page(&cache_id, PageRange { start, end })
                .await
        }
        CacheCommand::Search {
            cache_id,
            keyword,
            case_sensitive,
            max_results,
        } => {
            client
                .search_cache(&SearchCacheRequest {
                    cache_id,
                    keyword,
                    case_sensitive: case_sensitive.then_some(true),
                    max_results,
                })
                .await
        }
        CacheCommand::Context {
            cache_id,
            line,
            context_lines,
        } => {
            client
                .cache_context(&CacheContextRequest {
                    cache_id,
                    line_num: line,
                    context_lines,
                })
                .await
        }
    }
    .map_err(|e| e.to_string())?;
    print_json(&value)
}

/// Read a file, or all of stdin when no path is given.
fn read_input(path: Option<&Path>) -> Result<String, String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(text)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}
