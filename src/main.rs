// ABOUTME: Entry point for the dockwire CLI application.
// ABOUTME: Parses arguments, resolves the engine endpoint, and runs one command.

mod cli;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use dockwire::api::{
    ContainerOps, EventOptions, ListContainersOptions, Logs, LogsOptions, SystemOps,
};
use dockwire::client::{AsyncHandle, Client, EndReason, Filters};
use dockwire::config::ClientConfig;
use dockwire::error::{Error, Result};
use dockwire::types::ContainerId;
use futures::StreamExt;
use output::{Output, OutputMode};
use std::env;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Normal
    });

    if let Err(e) = run(cli, &output).await {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    let cwd = env::current_dir()?;
    let mut config = ClientConfig::discover(&cwd)?.apply_env();
    if let Some(host) = cli.host {
        config.host = Some(host);
    }
    let client = Client::from_config(&config)?;

    match cli.command {
        Commands::Ping => {
            let body = client.ping().await?;
            output.line(&body);
            Ok(())
        }
        Commands::Version => {
            let version = client.version().await?;
            output.line(&format!(
                "{} (API {}, {}/{})",
                version.version, version.api_version, version.os, version.arch
            ));
            Ok(())
        }
        Commands::Ps { all, filters } => {
            let opts = ListContainersOptions {
                all,
                limit: None,
                filters: parse_filters(&filters)?,
            };
            let containers = client.list_containers(&opts).await?;
            output.containers(&containers);
            Ok(())
        }
        Commands::Events {
            filters,
            since,
            until,
            idle_timeout,
        } => {
            let opts = EventOptions {
                since,
                until,
                filters: parse_filters(&filters)?,
                idle_timeout: idle_timeout.map(Duration::from_secs),
                owner: Some(interrupt_token()),
            };
            let handle = client.events(&opts).await?;
            drain(handle, output).await
        }
        Commands::Logs {
            container,
            follow,
            tail,
            timestamps,
        } => {
            let id = ContainerId::new(container);
            let tty = client.inspect_container(&id).await?.tty();
            let opts = LogsOptions {
                follow,
                timestamps,
                tail,
                tty,
                owner: Some(interrupt_token()),
                ..LogsOptions::default()
            };
            match client.container_logs(&id, &opts).await? {
                Logs::Complete(chunks) => {
                    for chunk in &chunks {
                        output.chunk(chunk);
                    }
                    Ok(())
                }
                Logs::Following(handle) => drain(handle, output).await,
            }
        }
    }
}

/// Print a subscription until it ends. Interrupts and clean closes succeed.
async fn drain(handle: AsyncHandle, output: &Output) -> Result<()> {
    let mut subscription = handle.subscription;
    while let Some(message) = subscription.next().await {
        output.message(&message);
        match message.end_reason() {
            None => {}
            Some(EndReason::Closed | EndReason::Finished | EndReason::IdleTimeout) => {
                return Ok(());
            }
            Some(other) => return Err(Error::Stream(other.to_string())),
        }
    }
    Ok(())
}

/// Cancelled on Ctrl-C, ending any subscription bound to it.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    token
}

fn parse_filters(raw: &[String]) -> Result<Filters> {
    let mut filters = Filters::new();
    for item in raw {
        let (name, value) = item
            .split_once('=')
            .ok_or_else(|| Error::InvalidArgument(format!("filter must be KEY=VALUE: {item}")))?;
        filters.insert(name, value);
    }
    Ok(filters)
}
