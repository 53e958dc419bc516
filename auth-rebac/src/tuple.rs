//! Textual relationship tuples: `namespace:resourceId#relation@subject`
//!
//! The subject is either a bare principal id (`doc:1#owner@2`) or a userset
//! reference (`doc:1#viewer@group:5#member`, "members of group 5 are viewers
//! of doc 1").

use crate::{
    error::{RebacError, Result},
    models::*,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who a tuple grants the relation to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TupleSubject {
    Principal(PrincipalId),
    Userset { resource: Resource, relation: Relation },
}

impl fmt::Display for TupleSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(id) => write!(f, "{}", id),
            Self::Userset { resource, relation } => write!(f, "{}#{}", resource, relation),
        }
    }
}

/// One parsed relationship tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipTuple {
    pub resource: Resource,
    pub relation: Relation,
    pub subject: TupleSubject,
}

impl RelationshipTuple {
    /// The graph edge this tuple denotes.
    pub fn to_edge(&self) -> Edge {
        match &self.subject {
            TupleSubject::Principal(principal) => {
                Edge::direct(*principal, self.relation.clone(), self.resource.clone())
            }
            TupleSubject::Userset { resource, relation } => Edge::userset(
                resource.clone(),
                relation.clone(),
                self.resource.clone(),
                self.relation.clone(),
            ),
        }
    }
}

impl From<&Edge> for RelationshipTuple {
    fn from(edge: &Edge) -> Self {
        let subject = match (&edge.source, &edge.source_relation) {
            (Node::Resource(resource), Some(relation)) => TupleSubject::Userset {
                resource: resource.clone(),
                relation: relation.clone(),
            },
            (Node::Principal(principal), _) => TupleSubject::Principal(*principal),
            // Resource edges are always written with a source relation.
            (Node::Resource(resource), None) => TupleSubject::Userset {
                resource: resource.clone(),
                relation: edge.label.clone(),
            },
        };
        Self {
            resource: edge.target.clone(),
            relation: edge.label.clone(),
            subject,
        }
    }
}

/// Split `namespace:id#relation` into its resource and relation.
fn parse_userset(text: &str) -> Result<(Resource, Relation)> {
    let (object, relation) = text.split_once('#').ok_or_else(|| {
        RebacError::validation(format!("'{}' is missing '#relation'", text))
    })?;
    Ok((object.trim().parse()?, Relation::new(relation)?))
}

impl FromStr for RelationshipTuple {
    type Err = RebacError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (object, subject) = line.split_once('@').ok_or_else(|| {
            RebacError::validation(format!("tuple '{}' is missing '@subject'", line))
        })?;
        let (resource, relation) = parse_userset(object)?;

        let subject = subject.trim();
        let subject = if !subject.is_empty() && subject.bytes().all(|b| b.is_ascii_digit()) {
            TupleSubject::Principal(subject.parse()?)
        } else if subject.contains(':') {
            let (resource, relation) = parse_userset(subject)?;
            TupleSubject::Userset { resource, relation }
        } else {
            return Err(RebacError::validation(format!(
                "subject '{}' is neither a principal id nor namespace:id#relation",
                subject
            )));
        };

        Ok(Self {
            resource,
            relation,
            subject,
        })
    }
}

impl fmt::Display for RelationshipTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}
