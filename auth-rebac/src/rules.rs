//! Rewrite rule table
//!
//! Maps a requested `(namespace, relation)` to the set of raw edge labels
//! that satisfy it. Tables are built from a nested mapping such as
//!
//! ```yaml
//! doc:
//!   viewer: viewer | owner | editor
//! group:
//!   member: member
//! ```
//!
//! where every leaf becomes a dotted `namespace.relation` key and its value
//! is split on `|`.

use crate::{error::RebacError, models::Relation};
use parking_lot::RwLock;
use serde::Serialize;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Separator between alternatives in a rule value.
pub const RELATION_DELIMITER: char = '|';

/// Separator between key segments in a flattened rule key.
pub const KEY_SEPARATOR: char = '.';

static NO_RELATIONS: BTreeSet<Relation> = BTreeSet::new();

/// Immutable rewrite rule table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteRules {
    /// namespace -> requested relation -> accepted labels
    rules: HashMap<String, HashMap<Relation, BTreeSet<Relation>>>,
}

impl RewriteRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a nested mapping into a rule table.
    pub fn load(raw: &Value) -> Result<Self, RebacError> {
        let Value::Mapping(root) = raw else {
            return Err(RebacError::config("rule table root must be a mapping"));
        };
        let mut rules = Self::new();
        let mut path = Vec::new();
        rules.flatten_into(root, &mut path)?;
        Ok(rules)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, RebacError> {
        let raw: Value = serde_yaml::from_str(source)?;
        Self::load(&raw)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RebacError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            RebacError::config(format!("cannot read rule table {}: {}", path.display(), e))
        })?;
        let rules = Self::from_yaml_str(&source)?;
        info!(path = %path.display(), rules = rules.len(), "Loaded rewrite rules");
        Ok(rules)
    }

    fn flatten_into(
        &mut self,
        mapping: &serde_yaml::Mapping,
        path: &mut Vec<String>,
    ) -> Result<(), RebacError> {
        for (key, value) in mapping {
            let segment = match key {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(RebacError::config(format!(
                        "rule key must be a string, got {:?}",
                        other
                    )))
                }
            };
            path.push(segment);
            let result = match value {
                Value::Mapping(nested) => self.flatten_into(nested, path),
                leaf => self.insert_leaf(path, leaf),
            };
            path.pop();
            result?;
        }
        Ok(())
    }

    fn insert_leaf(&mut self, path: &[String], leaf: &Value) -> Result<(), RebacError> {
        let key = path.join(".");
        let (namespace, relation) = key
            .rsplit_once(KEY_SEPARATOR)
            .filter(|(ns, rel)| !ns.is_empty() && !rel.is_empty())
            .ok_or_else(|| {
                RebacError::config(format!("rule '{}' is not of the form namespace.relation", key))
            })?;
        let relation = Relation::new(relation)
            .map_err(|e| RebacError::config(format!("rule '{}': {}", key, e)))?;
        let accepted = parse_leaf(&key, leaf)?;
        self.insert(namespace, relation, accepted)
    }

    /// Add one rule. Keys are unique; a second definition is rejected.
    pub fn insert(
        &mut self,
        namespace: &str,
        relation: Relation,
        accepted: BTreeSet<Relation>,
    ) -> Result<(), RebacError> {
        let relations = self.rules.entry(namespace.to_string()).or_default();
        if relations.contains_key(&relation) {
            return Err(RebacError::config(format!(
                "duplicate rule '{}.{}'",
                namespace, relation
            )));
        }
        relations.insert(relation, accepted);
        Ok(())
    }

    /// Labels accepted as satisfying `relation` on `namespace`. Unconfigured
    /// keys yield the empty set.
    pub fn lookup(&self, namespace: &str, relation: &Relation) -> &BTreeSet<Relation> {
        self.rules
            .get(namespace)
            .and_then(|relations| relations.get(relation))
            .unwrap_or(&NO_RELATIONS)
    }

    pub fn accepts(&self, namespace: &str, relation: &Relation, label: &Relation) -> bool {
        self.lookup(namespace, relation).contains(label)
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The table keyed by dotted `namespace.relation`, sorted for display.
    pub fn flattened(&self) -> BTreeMap<String, Vec<String>> {
        self.rules
            .iter()
            .flat_map(|(namespace, relations)| {
                relations.iter().map(move |(relation, accepted)| {
                    (
                        format!("{}{}{}", namespace, KEY_SEPARATOR, relation),
                        accepted.iter().map(|r| r.to_string()).collect(),
                    )
                })
            })
            .collect()
    }
}

fn parse_leaf(key: &str, leaf: &Value) -> Result<BTreeSet<Relation>, RebacError> {
    let mut accepted = BTreeSet::new();
    match leaf {
        Value::String(s) => split_relations(key, s, &mut accepted)?,
        Value::Number(n) => split_relations(key, &n.to_string(), &mut accepted)?,
        Value::Bool(b) => split_relations(key, &b.to_string(), &mut accepted)?,
        Value::Sequence(items) => {
            for item in items {
                match item {
                    Value::String(s) => split_relations(key, s, &mut accepted)?,
                    other => {
                        return Err(RebacError::config(format!(
                            "rule '{}' lists a non-string relation {:?}",
                            key, other
                        )))
                    }
                }
            }
        }
        Value::Null => {
            return Err(RebacError::config(format!("rule '{}' has no value", key)));
        }
        other => {
            return Err(RebacError::config(format!(
                "rule '{}' has unsupported value {:?}",
                key, other
            )))
        }
    }
    if accepted.is_empty() {
        return Err(RebacError::config(format!("rule '{}' names no relations", key)));
    }
    Ok(accepted)
}

fn split_relations(
    key: &str,
    value: &str,
    accepted: &mut BTreeSet<Relation>,
) -> Result<(), RebacError> {
    for piece in value.split(RELATION_DELIMITER) {
        if piece.trim().is_empty() {
            continue;
        }
        let relation = Relation::new(piece)
            .map_err(|e| RebacError::config(format!("rule '{}': {}", key, e)))?;
        accepted.insert(relation);
    }
    Ok(())
}

/// Shared, atomically replaceable handle to the current rule table.
///
/// A check reads the table once through [`RuleTableHandle::current`] and
/// uses that version throughout, so a reload is never seen half-applied.
pub struct RuleTableHandle {
    current: RwLock<Arc<RewriteRules>>,
    generation: AtomicU64,
}

impl RuleTableHandle {
    pub fn new(rules: RewriteRules) -> Self {
        Self {
            current: RwLock::new(Arc::new(rules)),
            generation: AtomicU64::new(0),
        }
    }

    /// The current table and its generation number.
    pub fn current(&self) -> (u64, Arc<RewriteRules>) {
        let guard = self.current.read();
        (self.generation.load(Ordering::Acquire), guard.clone())
    }

    /// Swap in a whole new table, returning the previous one.
    pub fn replace(&self, rules: RewriteRules) -> Arc<RewriteRules> {
        let mut guard = self.current.write();
        let previous = std::mem::replace(&mut *guard, Arc::new(rules));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, rules = guard.len(), "Rewrite rules replaced");
        previous
    }
}

impl Default for RuleTableHandle {
    fn default() -> Self {
        Self::new(RewriteRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(name: &str) -> Relation {
        Relation::new(name).unwrap()
    }

    fn names(set: &BTreeSet<Relation>) -> Vec<&str> {
        set.iter().map(Relation::as_str).collect()
    }

    #[test]
    fn test_nested_mapping_flattens_to_dotted_keys() {
        let rules = RewriteRules::from_yaml_str(
            "doc:\n  viewer: viewer | Owner|editor\n  owner: owner\ngroup:\n  member: member\n",
        )
        .unwrap();

        assert_eq!(rules.len(), 3);
        assert_eq!(names(rules.lookup("doc", &rel("viewer"))), vec!["editor", "owner", "viewer"]);
        assert_eq!(names(rules.lookup("doc", &rel("owner"))), vec!["owner"]);
        assert!(rules.accepts("group", &rel("member"), &rel("member")));
    }

    #[test]
    fn test_deep_nesting_keeps_prefix_as_namespace() {
        let rules = RewriteRules::from_yaml_str("org:\n  team:\n    lead: admin|lead\n").unwrap();
        assert_eq!(names(rules.lookup("org.team", &rel("lead"))), vec!["admin", "lead"]);
        assert!(rules.lookup("org", &rel("team")).is_empty());
    }

    #[test]
    fn test_dotted_top_level_key_is_equivalent() {
        let rules = RewriteRules::from_yaml_str("doc.viewer: viewer\n").unwrap();
        assert!(rules.accepts("doc", &rel("viewer"), &rel("viewer")));
    }

    #[test]
    fn test_unconfigured_lookup_is_empty() {
        let rules = RewriteRules::from_yaml_str("doc:\n  viewer: viewer\n").unwrap();
        assert!(rules.lookup("doc", &rel("editor")).is_empty());
        assert!(rules.lookup("folder", &rel("viewer")).is_empty());
        assert!(RewriteRules::new().lookup("doc", &rel("viewer")).is_empty());
    }

    #[test]
    fn test_sequence_leaf_is_union() {
        let rules = RewriteRules::from_yaml_str("doc:\n  viewer: [viewer, 'owner | editor']\n").unwrap();
        assert_eq!(rules.lookup("doc", &rel("viewer")).len(), 3);
    }

    #[test]
    fn test_invalid_tables_are_config_errors() {
        for source in [
            "- doc\n",
            "viewer: viewer\n",
            "doc:\n  viewer: ~\n",
            "doc:\n  viewer: ' | '\n",
            "doc:\n  viewer: 'bad name'\n",
            "doc.viewer: viewer\ndoc:\n  viewer: owner\n",
            "doc: [unclosed\n",
        ] {
            let err = RewriteRules::from_yaml_str(source).unwrap_err();
            assert!(matches!(err, RebacError::ConfigError(_)), "{}: {:?}", source, err);
        }
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usersets.yaml");
        std::fs::write(&path, "doc:\n  viewer: viewer|owner\n").unwrap();

        let rules = RewriteRules::from_path(&path).unwrap();
        assert!(rules.accepts("doc", &rel("viewer"), &rel("owner")));

        assert!(RewriteRules::from_path(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_handle_replaces_whole_table() {
        let handle = RuleTableHandle::new(RewriteRules::from_yaml_str("doc:\n  viewer: viewer\n").unwrap());
        let (generation, before) = handle.current();
        assert_eq!(generation, 0);

        let previous = handle.replace(RewriteRules::from_yaml_str("doc:\n  viewer: owner\n").unwrap());
        assert_eq!(previous, before);

        let (generation, after) = handle.current();
        assert_eq!(generation, 1);
        assert!(after.accepts("doc", &rel("viewer"), &rel("owner")));
        assert!(!after.accepts("doc", &rel("viewer"), &rel("viewer")));
        assert!(before.accepts("doc", &rel("viewer"), &rel("viewer")));
    }
}
