//! Settings file and its merge with command line flags.
//!
//! Every setting is optional; flags given on the command line win.

use anyhow::Context;
use podlogs::{AggregateOptions, RetryPolicy};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub namespace: Option<String>,
    pub context: Option<String>,
    pub container: Option<String>,
    pub timestamps: Option<bool>,
    pub prefix: Option<bool>,
    /// JSON fields projected when none are given on the command line
    pub json: Vec<String>,
    pub buffer_size: Option<usize>,
    pub retry: Option<RetryPolicy>,
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        // An empty document deserializes as unit, not as a map
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }
}

/// Everything the binary needs to run, after merging flags over settings.
#[derive(Debug)]
pub struct RunConfig {
    pub resources: Vec<String>,
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub options: AggregateOptions,
    pub grep: Option<Regex>,
    pub prefix: bool,
}

impl RunConfig {
    pub fn new(cli: Cli, settings: Settings) -> anyhow::Result<Self> {
        let grep = cli
            .grep
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("Invalid --grep pattern")?;

        let mut retry = settings.retry.unwrap_or_default();
        if let Some(secs) = cli.retry_interval {
            retry.interval = Duration::try_from_secs_f64(secs).context("Invalid --retry-interval")?;
        }
        if let Some(max) = cli.max_retries {
            retry.max_attempts = Some(max);
        }
        // Zero attempts means no bound, from either source
        retry.max_attempts = retry.max_attempts.filter(|&max| max > 0);

        let mut options = AggregateOptions::default()
            .with_follow(cli.follow)
            .with_timestamps(!cli.no_timestamps && settings.timestamps.unwrap_or(true))
            .with_json_fields(if cli.json.is_empty() { settings.json } else { cli.json })
            .with_container(cli.container.or(settings.container))
            .with_tail_lines(cli.tail)
            .with_retry(retry);
        if let Some(namespace) = cli.namespace.or(settings.namespace) {
            options = options.with_namespace(namespace);
        }
        if let Some(capacity) = cli.buffer_size.or(settings.buffer_size) {
            options = options.with_exchange_capacity(capacity);
        }

        let prefix = cli.prefix || settings.prefix.unwrap_or(false) || cli.resources.len() > 1;
        Ok(Self {
            resources: cli.resources,
            context: cli.context.or(settings.context),
            kubeconfig: cli.kubeconfig,
            options,
            grep,
            prefix,
        })
    }
}
