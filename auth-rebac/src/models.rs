use crate::error::{RebacError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Characters reserved by the tuple syntax `namespace:id#relation@subject`
/// and by the rule-table delimiter.
const RESERVED_CHARS: [char; 4] = [':', '#', '@', '|'];

fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RebacError::validation(format!("{} must not be empty", kind)));
    }
    if let Some(c) = value
        .chars()
        .find(|c| c.is_whitespace() || RESERVED_CHARS.contains(c))
    {
        return Err(RebacError::validation(format!(
            "{} '{}' contains reserved character '{}'",
            kind, value, c
        )));
    }
    Ok(())
}

/// Parse a non-negative integer identifier.
pub fn parse_id(kind: &str, value: &str) -> Result<u64> {
    let trimmed = value.trim();
    trimmed.parse::<u64>().map_err(|_| {
        RebacError::validation(format!(
            "{} must be a non-negative integer, got '{}'",
            kind, value
        ))
    })
}

/// A principal (user). Principals only ever appear as the source of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub u64);

impl PrincipalId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for PrincipalId {
    type Err = RebacError;

    fn from_str(s: &str) -> Result<Self> {
        parse_id("principal id", s).map(Self)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A protected resource, identified by namespace and numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resource {
    pub namespace: String,
    pub id: u64,
}

impl Resource {
    /// Namespaces are case-sensitive and kept as given, minus surrounding whitespace.
    pub fn new(namespace: &str, id: u64) -> Result<Self> {
        let namespace = namespace.trim();
        validate_name("namespace", namespace)?;
        Ok(Self {
            namespace: namespace.to_string(),
            id,
        })
    }
}

impl FromStr for Resource {
    type Err = RebacError;

    /// Parses `namespace:id`.
    fn from_str(s: &str) -> Result<Self> {
        let (namespace, id) = s.split_once(':').ok_or_else(|| {
            RebacError::validation(format!("resource '{}' is not of the form namespace:id", s))
        })?;
        Self::new(namespace, parse_id("resource id", id)?)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// A relation name in canonical (trimmed, lower-case) form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Relation(String);

impl Relation {
    pub fn new(name: &str) -> Result<Self> {
        let name = name.trim().to_lowercase();
        validate_name("relation", &name)?;
        if name.contains('.') {
            return Err(RebacError::validation(format!(
                "relation '{}' must not contain '.'",
                name
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Relation {
    type Error = RebacError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Relation> for String {
    fn from(relation: Relation) -> Self {
        relation.0
    }
}

impl AsRef<str> for Relation {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A vertex of the relationship graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Node {
    Principal(PrincipalId),
    Resource(Resource),
}

impl From<PrincipalId> for Node {
    fn from(principal: PrincipalId) -> Self {
        Self::Principal(principal)
    }
}

impl From<Resource> for Node {
    fn from(resource: Resource) -> Self {
        Self::Resource(resource)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(id) => write!(f, "{}", id),
            Self::Resource(resource) => write!(f, "{}", resource),
        }
    }
}

/// A directed, labelled edge of the relationship graph (one tuple).
///
/// Direct grants run from a principal and carry no `source_relation`.
/// Userset grants run from a resource and name, in `source_relation`, the
/// relation a subject must hold on that resource to take part in the grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: Node,
    pub label: Relation,
    pub target: Resource,
    pub source_relation: Option<Relation>,
}

impl Edge {
    pub fn direct(principal: PrincipalId, label: Relation, target: Resource) -> Self {
        Self {
            source: Node::Principal(principal),
            label,
            target,
            source_relation: None,
        }
    }

    pub fn userset(
        source: Resource,
        source_relation: Relation,
        target: Resource,
        label: Relation,
    ) -> Self {
        Self {
            source: Node::Resource(source),
            label,
            target,
            source_relation: Some(source_relation),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.source, Node::Principal(_))
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.target, self.label, self.source)?;
        if let Some(ref source_relation) = self.source_relation {
            write!(f, "#{}", source_relation)?;
        }
        Ok(())
    }
}

/// Authorization check request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRequest {
    pub principal: PrincipalId,
    pub resource: Resource,
    pub relation: Relation,
}

impl CheckRequest {
    pub fn new(principal_id: u64, resource_id: u64, namespace: &str, relation: &str) -> Result<Self> {
        Ok(Self {
            principal: PrincipalId(principal_id),
            resource: Resource::new(namespace, resource_id)?,
            relation: Relation::new(relation)?,
        })
    }

    /// Build a request from raw text fields, e.g. as received over RPC.
    pub fn parse(principal_id: &str, resource_id: &str, namespace: &str, relation: &str) -> Result<Self> {
        Self::new(
            parse_id("principal id", principal_id)?,
            parse_id("resource id", resource_id)?,
            namespace,
            relation,
        )
    }
}

impl fmt::Display for CheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.principal)
    }
}
