use thiserror::Error;

use crate::cluster::ClientError;
use crate::types::ResourceKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid resource specifier '{0}': expected [namespace/][type/]name")]
    InvalidSpecifier(String),

    #[error("invalid resource type '{0}'")]
    InvalidResourceType(String),

    #[error("invalid name pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to resolve {kind} '{name}' in namespace {namespace}: {source}")]
    Resolution {
        namespace: String,
        kind: ResourceKind,
        name: String,
        #[source]
        source: ClientError,
    },

    #[error("unsupported selector on {kind} '{name}': {reason}")]
    Selector {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("log stream of pod {namespace}/{pod}: {source}")]
    LogStream {
        namespace: String,
        pod: String,
        #[source]
        source: ClientError,
    },

    #[error("watch on {kind} in namespace {namespace} failed: {source}")]
    Watch {
        namespace: String,
        kind: ResourceKind,
        #[source]
        source: ClientError,
    },
}

/// Coarse classification of [`Error`], used by consumers to decide fatality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Resolution,
    Stream,
    Watch,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSpecifier(_)
            | Self::InvalidResourceType(_)
            | Self::InvalidPattern { .. } => ErrorKind::Parse,
            Self::Resolution { .. } | Self::Selector { .. } => ErrorKind::Resolution,
            Self::LogStream { .. } => ErrorKind::Stream,
            Self::Watch { .. } => ErrorKind::Watch,
        }
    }

    pub(crate) fn log_stream(namespace: &str, pod: &str, source: impl Into<ClientError>) -> Self {
        Self::LogStream {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            source: source.into(),
        }
    }
}
