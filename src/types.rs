use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;
use std::fmt;

/// A single line of container output, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogLine {
    pub namespace: String,
    /// Name of the resource that matched the specifier (controller or pod)
    pub resource_name: String,
    pub resource_kind: ResourceKind,
    pub pod_name: String,
    pub text: String,
    /// Parsed from the line prefix when timestamps were requested
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// Resource types a specifier can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pod,
    Controller(ControllerKind),
}

/// Resource types that select their member pods through a label selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControllerKind {
    Deployment,
    Service,
    StatefulSet,
    ReplicaSet,
}

impl ResourceKind {
    pub const DEPLOYMENT: Self = Self::Controller(ControllerKind::Deployment);
    pub const SERVICE: Self = Self::Controller(ControllerKind::Service);
    pub const STATEFUL_SET: Self = Self::Controller(ControllerKind::StatefulSet);
    pub const REPLICA_SET: Self = Self::Controller(ControllerKind::ReplicaSet);

    /// Resolve a user supplied type token (`po`, `deploy`, `svc`, ...).
    pub fn from_alias(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "po" | "pod" | "pods" => Some(Self::Pod),
            "deploy" | "deployment" | "deployments" => Some(Self::DEPLOYMENT),
            "svc" | "service" | "services" => Some(Self::SERVICE),
            "sts" | "statefulset" | "statefulsets" => Some(Self::STATEFUL_SET),
            "rs" | "replicaset" | "replicasets" => Some(Self::REPLICA_SET),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod => f.write_str("pod"),
            Self::Controller(kind) => fmt::Display::fmt(kind, f),
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::StatefulSet => "statefulset",
            Self::ReplicaSet => "replicaset",
        })
    }
}

/// Identity of a pod as seen by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// A controller object reduced to what log resolution needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerRef {
    pub namespace: String,
    pub name: String,
    /// None when the object carries no selector (e.g. a headless Service
    /// with manually managed endpoints)
    pub selector: Option<LabelSelector>,
}

/// Options forwarded to the pod log endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub follow: bool,
    pub timestamps: bool,
    pub container: Option<String>,
    pub tail_lines: Option<i64>,
}
