//! Relationship-based access checks over a tuple graph
//!
//! Decides whether a principal holds a named relation on a resource, either
//! through a direct grant or through chains of userset grants (group and
//! role membership nested to any depth).
//!
//! # Core Concepts
//!
//! - **Principal**: a user, identified by a non-negative integer
//! - **Resource**: `namespace:id`, e.g. `doc:1` or `group:5`
//! - **Tuple**: `doc:1#viewer@2` (direct) or `doc:1#viewer@group:5#member`
//!   (everyone who is a member of group 5 is a viewer of doc 1)
//! - **Rewrite rule**: `doc.viewer: viewer | owner | editor`, the raw labels
//!   that satisfy a requested relation
//!
//! # Example
//!
//! ```rust
//! use auth_rebac::{AuthorizationEngine, RewriteRules};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rules = RewriteRules::from_yaml_str(
//!         "doc:\n  viewer: viewer | owner\ngroup:\n  member: member\n",
//!     )?;
//!     let engine = AuthorizationEngine::in_memory(rules);
//!
//!     engine.mutations().import_str("group:5#member@2\ndoc:1#viewer@group:5#member\n").await;
//!
//!     assert!(engine.check_access(2, 1, "doc", "viewer").await?);
//!     assert!(!engine.check_access(3, 1, "doc", "viewer").await?);
//!     Ok(())
//! }
//! ```

pub mod check;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod mutation;
pub mod repository;
pub mod rules;
pub mod tuple;

pub use check::{CheckConfig, CheckEngine};
pub use config::EngineConfig;
pub use engine::*;
pub use error::*;
pub use models::*;
pub use mutation::{ImportFailure, ImportReport, MutationApi};
pub use repository::{DeadlineStore, GraphSnapshot, InMemoryTupleStore, TupleStore};
pub use rules::{RewriteRules, RuleTableHandle};
pub use tuple::{RelationshipTuple, TupleSubject};
