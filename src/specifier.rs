use glob::Pattern;

use crate::error::{Error, Result};
use crate::types::ResourceKind;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Parsed form of `[namespace/][type/]name`, where `name` is a glob.
#[derive(Debug, Clone)]
pub struct ResourceSpecifier {
    pub namespace: String,
    pub kind: ResourceKind,
    pub pattern: Pattern,
}

impl ResourceSpecifier {
    /// Parse a specifier, falling back to the `default` namespace.
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_with_namespace(input, DEFAULT_NAMESPACE)
    }

    /// Parse a specifier, using `namespace` when the input does not name one.
    pub fn parse_with_namespace(input: &str, namespace: &str) -> Result<Self> {
        let chunks: Vec<&str> = input.split('/').collect();
        if chunks.iter().any(|c| c.is_empty()) {
            return Err(Error::InvalidSpecifier(input.to_string()));
        }

        let (namespace, kind, name) = match chunks.as_slice() {
            [name] => (namespace, ResourceKind::Pod, *name),
            [kind, name] => (namespace, parse_kind(kind)?, *name),
            [ns, kind, name] => (*ns, parse_kind(kind)?, *name),
            _ => return Err(Error::InvalidSpecifier(input.to_string())),
        };

        let pattern = Pattern::new(name).map_err(|source| Error::InvalidPattern {
            pattern: name.to_string(),
            source,
        })?;

        Ok(Self {
            namespace: namespace.to_string(),
            kind,
            pattern,
        })
    }

    /// Check whether a resource name matches the name pattern.
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.matches(name)
    }
}

fn parse_kind(token: &str) -> Result<ResourceKind> {
    ResourceKind::from_alias(token).ok_or_else(|| Error::InvalidResourceType(token.to_string()))
}

impl std::fmt::Display for ResourceSpecifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.pattern)
    }
}
