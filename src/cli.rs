use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kubectl-podlogs")]
#[command(about = "Aggregate logs from the pods behind Kubernetes resources")]
pub struct Cli {
    /// Resources to read, as [namespace/][type/]name (name may be a glob)
    #[arg(required = true)]
    pub resources: Vec<String>,

    /// Keep streaming and pick up pods as they appear
    #[arg(short, long)]
    pub follow: bool,

    /// Namespace for resources that don't name one
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Container name (if multi-container pod)
    #[arg(short = 'c', long)]
    pub container: Option<String>,

    /// Context
    #[arg(long)]
    pub context: Option<String>,

    /// Path to the kubeconfig file to use instead of the default lookup
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// JSON fields to print instead of the whole line
    #[arg(short = 'j', long = "json", value_delimiter = ',')]
    pub json: Vec<String>,

    /// Don't request timestamps from the API server
    #[arg(long)]
    pub no_timestamps: bool,

    /// Number of lines to show from the end of each pod's log
    #[arg(long)]
    pub tail: Option<i64>,

    /// Only print lines matching this regex
    #[arg(long)]
    pub grep: Option<String>,

    /// Prefix lines with namespace and pod even for a single resource
    #[arg(long)]
    pub prefix: bool,

    /// Seconds between attempts to open the logs of a new pod
    #[arg(long)]
    pub retry_interval: Option<f64>,

    /// Attempts before giving up on a new pod (0 retries forever)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Lines buffered between pod readers and the output
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// YAML file with default settings
    #[arg(long)]
    pub config: Option<PathBuf>,
}
