//! Care Home Live CLI - watches the dashboard's live-updates channel.
//!
//! This is the main binary entry point. See the `carehome_live` library
//! for the core functionality.

use anyhow::{Context, Result};
use carehome_live::{
    env::Environment, ChannelService, ChannelServiceHandle, Config, Visibility, WsConnector,
};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "carehome-live")]
#[command(version)]
#[command(about = "Resilient live-updates channel client for the care-home dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print every inbound message as a JSON line
    Watch {
        /// Origin of the dashboard API (overrides config)
        #[arg(long)]
        server_url: Option<String>,
        /// Endpoint path, e.g. /ws/call-status (overrides config)
        #[arg(long)]
        path: Option<String>,
        /// Event kind to subscribe to after each open (repeatable)
        #[arg(long = "subscribe", value_name = "EVENT")]
        subscriptions: Vec<String>,
    },
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
    /// Print the reconnect delay schedule
    Backoff,
}

/// Stdin command understood by `watch`.
#[derive(Debug, PartialEq)]
enum Input {
    Connect,
    Disconnect,
    Visibility(Visibility),
    Status,
    Send(serde_json::Value),
    Empty,
}

fn parse_input(line: &str) -> Result<Input> {
    let line = line.trim();
    Ok(match line {
        "" => Input::Empty,
        ":connect" => Input::Connect,
        ":disconnect" => Input::Disconnect,
        ":hidden" => Input::Visibility(Visibility::Hidden),
        ":visible" => Input::Visibility(Visibility::Visible),
        ":status" => Input::Status,
        _ if line.starts_with(':') => anyhow::bail!("unknown command {line}"),
        _ => Input::Send(serde_json::from_str(line).context("input is not valid JSON")?),
    })
}

fn apply_input(handle: &ChannelServiceHandle, input: Input) -> Result<()> {
    match input {
        Input::Connect => handle.connect()?,
        Input::Disconnect => handle.disconnect()?,
        Input::Visibility(visibility) => handle.set_visibility(visibility)?,
        Input::Status => {
            eprintln!("{}", serde_json::to_string(&handle.snapshot())?);
        }
        Input::Send(value) => handle.send(&value)?,
        Input::Empty => {}
    }
    Ok(())
}

/// Runs the channel until Ctrl-C or end of input.
async fn run_watch(config: Config) -> Result<()> {
    let url = config.endpoint_url();
    println!("Watching {url} (Ctrl-C to quit)");

    let service = ChannelService::spawn(config.client_config(), WsConnector::new());
    let handle = service.handle();
    let mut updates = handle.subscribe();
    let mut messages = handle.messages();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_status = handle.status();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }

            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().status;
                if status != last_status {
                    log::info!("Status: {} -> {}", last_status, status);
                    last_status = status;
                }
            }

            message = messages.recv() => {
                match message {
                    Ok(message) => println!("{}", serde_json::to_string(&message)?),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Output fell behind, skipped {skipped} messages");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    log::info!("End of input");
                    break;
                };
                match parse_input(&line) {
                    Ok(input) => apply_input(&handle, input)?,
                    Err(e) => eprintln!("{e:#}"),
                }
            }
        }
    }

    println!("Shutting down...");
    service.shutdown().await;
    Ok(())
}

fn print_backoff(config: &Config) {
    let policy = config.reconnect_policy();
    println!(
        "base={}ms max={}ms attempts={}",
        policy.base_delay.as_millis(),
        policy.max_delay.as_millis(),
        policy.max_attempts
    );
    for attempt in 0..policy.max_attempts {
        println!(
            "  retry {:>2}: {:>6}ms",
            attempt + 1,
            policy.delay_for(attempt).as_millis()
        );
    }
}

fn init_logging() -> Result<()> {
    let filter = Environment::current().default_log_filter();
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter));
    builder.format_timestamp_secs();

    // stdout carries messages; logs go to CAREHOME_LOG_FILE or stderr
    if let Ok(path) = std::env::var("CAREHOME_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(env_logger::Target::Stderr);
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            server_url,
            path,
            subscriptions,
        } => {
            let mut config = Config::load()?;
            if let Some(server_url) = server_url {
                config.server_url = server_url;
            }
            if let Some(path) = path {
                config.endpoint_path = path;
            }
            if !subscriptions.is_empty() {
                config.subscriptions = subscriptions;
            }
            run_watch(config).await?;
        }
        Commands::Config { save } => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("endpoint: {}", config.endpoint_url());
            if save {
                config.save()?;
                println!("Saved to {}", Config::config_dir()?.join("config.json").display());
            }
        }
        Commands::Backoff => {
            print_backoff(&Config::load()?);
        }
    }

    Ok(())
}
