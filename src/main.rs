mod cli;
mod config;

use anyhow::Context;
use clap::Parser;
use crossterm::style::Stylize;
use kube::{Client, config as kubeconfig};
use podlogs::{Aggregator, KubeCluster, LogIterator, LogLine};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use cli::Cli;
use config::{RunConfig, Settings};
use podlogs::utils::get_color;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only pod output
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let config = RunConfig::new(cli, settings)?;

    let client = initialize_client(config.kubeconfig.as_deref(), config.context.as_deref()).await?;
    let aggregator = Aggregator::new(Arc::new(KubeCluster::new(client)), config.options.clone());
    let mut logs = aggregator.aggregate(&config.resources);

    tokio::select! {
        _ = print_logs(&mut logs, &config) => {
            debug!("all log streams finished");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted, stopping log streams");
        }
    }
    logs.stop().await;
    Ok(())
}

async fn initialize_client(
    kubeconfig_path: Option<&Path>,
    context: Option<&str>,
) -> anyhow::Result<Client> {
    let options = kubeconfig::KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    let config = match (kubeconfig_path, context) {
        (Some(path), _) => {
            let file = kubeconfig::Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            kubeconfig::Config::from_custom_kubeconfig(file, &options)
                .await
                .with_context(|| format!("Invalid kubeconfig {}", path.display()))?
        }
        (None, None) => kubeconfig::Config::infer().await?,
        (None, Some(ctx)) => kubeconfig::Config::from_kubeconfig(&options)
            .await
            .map_err(|e| anyhow::anyhow!("Context '{}' not found in kubeconfig: {}", ctx, e))?,
    };
    let client = Client::try_from(config)?;
    match context {
        Some(ctx) => info!("Initialized client for context: {}", ctx),
        None => debug!("Using current context"),
    }
    Ok(client)
}

async fn print_logs(logs: &mut LogIterator<LogLine>, config: &RunConfig) {
    while let Some(item) = logs.recv().await {
        let line = match item {
            Ok(line) => line,
            Err(e) => {
                error!("{}", e);
                continue;
            }
        };
        if let Some(regex) = &config.grep
            && !regex.is_match(&line.text)
        {
            continue;
        }

        if config.prefix {
            let color = get_color(&line.pod_name);
            let prefix = format!("[{}][{}]", line.namespace, line.pod_name).with(color);
            println!("{} {}", prefix, line.text);
        } else {
            println!("{}", line.text);
        }
    }
}
