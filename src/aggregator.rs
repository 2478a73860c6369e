//! Entry point tying specifiers, resolution and merging together.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cluster::ClusterApi;
use crate::iterator::{DEFAULT_EXCHANGE_CAPACITY, LogIterator, channel};
use crate::projection::FieldProjection;
use crate::reader::ReaderConfig;
use crate::resolver::Resolver;
use crate::retry::RetryPolicy;
use crate::specifier::{DEFAULT_NAMESPACE, ResourceSpecifier};
use crate::types::{LogLine, LogOptions};

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub follow: bool,
    pub timestamps: bool,
    /// JSON fields to project; when set, timestamps are not requested
    pub json_fields: Vec<String>,
    pub container: Option<String>,
    pub tail_lines: Option<i64>,
    /// Namespace for specifiers that don't name one
    pub namespace: String,
    pub retry: RetryPolicy,
    pub exchange_capacity: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            follow: false,
            timestamps: false,
            json_fields: Vec::new(),
            container: None,
            tail_lines: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            retry: RetryPolicy::default(),
            exchange_capacity: DEFAULT_EXCHANGE_CAPACITY,
        }
    }
}

impl AggregateOptions {
    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_json_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }

    pub fn with_tail_lines(mut self, tail_lines: Option<i64>) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_exchange_capacity(mut self, capacity: usize) -> Self {
        self.exchange_capacity = capacity;
        self
    }

    fn reader_config(&self) -> ReaderConfig {
        let projection = FieldProjection::new(&self.json_fields);
        // A timestamp prefix would break the JSON document
        let timestamps = self.timestamps && projection.is_empty();
        ReaderConfig {
            options: LogOptions {
                follow: self.follow,
                timestamps,
                container: self.container.clone(),
                tail_lines: self.tail_lines,
            },
            projection: Arc::new(projection),
        }
    }
}

/// Aggregates the logs of many resource specifiers against one cluster.
#[derive(Clone)]
pub struct Aggregator {
    cluster: Arc<dyn ClusterApi>,
    options: AggregateOptions,
}

impl Aggregator {
    pub fn new(cluster: Arc<dyn ClusterApi>, options: AggregateOptions) -> Self {
        Self { cluster, options }
    }

    /// Resolve every specifier concurrently and merge all their pods' logs.
    ///
    /// Must be called within a tokio runtime. A specifier that fails to parse
    /// or resolve contributes a single error element; the others are
    /// unaffected.
    pub fn aggregate<S: AsRef<str>>(&self, specifiers: &[S]) -> LogIterator<LogLine> {
        let (merger, iter) = channel(self.options.exchange_capacity, CancellationToken::new());
        let resolver = Resolver::new(
            self.cluster.clone(),
            self.options.reader_config(),
            self.options.retry,
        );

        for raw in specifiers {
            let raw = raw.as_ref().to_string();
            let namespace = self.options.namespace.clone();
            let resolver = resolver.clone();
            let sink = merger.clone();
            merger.spawn(async move {
                let spec = match ResourceSpecifier::parse_with_namespace(&raw, &namespace) {
                    Ok(spec) => spec,
                    Err(e) => {
                        warn!("skipping '{}': {}", raw, e);
                        sink.send(Err(e)).await;
                        return;
                    }
                };
                debug!("[{}] retrieve logs of {}", spec.namespace, spec);
                if let Err(e) = resolver.resolve(&spec, &sink).await {
                    sink.send(Err(e)).await;
                }
            });
        }
        iter
    }
}

/// Shorthand for `Aggregator::new(cluster, options).aggregate(specifiers)`.
pub fn aggregate<S: AsRef<str>>(
    cluster: Arc<dyn ClusterApi>,
    specifiers: &[S],
    options: AggregateOptions,
) -> LogIterator<LogLine> {
    Aggregator::new(cluster, options).aggregate(specifiers)
}
