//! Mutation API over the tuple store, including bulk seed import.

use crate::{
    error::{RebacError, Result},
    models::*,
    repository::TupleStore,
    tuple::RelationshipTuple,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// A seed line that could not be applied.
#[derive(Debug)]
pub struct ImportFailure {
    pub line_number: usize,
    pub line: String,
    pub error: RebacError,
}

/// Outcome of a bulk import. Imports are not transactional: every line that
/// succeeded stays applied regardless of failures elsewhere in the batch.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Lines that added a new edge
    pub applied: usize,
    /// Lines whose edge already existed
    pub unchanged: usize,
    /// Blank and comment lines
    pub skipped: usize,
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn processed(&self) -> usize {
        self.applied + self.unchanged + self.failures.len()
    }
}

/// Create/delete operations on relationships.
#[derive(Clone)]
pub struct MutationApi {
    store: Arc<dyn TupleStore>,
}

impl MutationApi {
    pub fn new(store: Arc<dyn TupleStore>) -> Self {
        Self { store }
    }

    /// Grant `relation` on `namespace:resource_id` directly to a principal.
    pub async fn create_direct_relation(
        &self,
        principal_id: u64,
        relation: &str,
        resource_id: u64,
        namespace: &str,
    ) -> Result<bool> {
        let relation = Relation::new(relation)?;
        let resource = Resource::new(namespace, resource_id)?;
        info!("Creating direct relation: {}#{}@{}", resource, relation, principal_id);
        self.store
            .upsert_direct_edge(PrincipalId(principal_id), &relation, &resource)
            .await
    }

    pub async fn delete_direct_relation(
        &self,
        principal_id: u64,
        relation: &str,
        resource_id: u64,
        namespace: &str,
    ) -> Result<bool> {
        let relation = Relation::new(relation)?;
        let resource = Resource::new(namespace, resource_id)?;
        info!("Deleting direct relation: {}#{}@{}", resource, relation, principal_id);
        self.store
            .delete_direct_edge(PrincipalId(principal_id), &relation, &resource)
            .await
    }

    /// Grant `to_relation` on `to_namespace:to_id` to everyone holding
    /// `from_relation` on `from_namespace:from_id`.
    pub async fn create_resource_relation(
        &self,
        from_id: u64,
        from_namespace: &str,
        from_relation: &str,
        to_id: u64,
        to_namespace: &str,
        to_relation: &str,
    ) -> Result<bool> {
        let edge = Edge::userset(
            Resource::new(from_namespace, from_id)?,
            Relation::new(from_relation)?,
            Resource::new(to_namespace, to_id)?,
            Relation::new(to_relation)?,
        );
        info!("Creating resource relation: {}", edge);
        self.store.upsert_edge(&edge).await
    }

    pub async fn delete_resource_relation(
        &self,
        from_id: u64,
        from_namespace: &str,
        from_relation: &str,
        to_id: u64,
        to_namespace: &str,
        to_relation: &str,
    ) -> Result<bool> {
        let edge = Edge::userset(
            Resource::new(from_namespace, from_id)?,
            Relation::new(from_relation)?,
            Resource::new(to_namespace, to_id)?,
            Relation::new(to_relation)?,
        );
        info!("Deleting resource relation: {}", edge);
        self.store.delete_edge(&edge).await
    }

    /// Remove a principal and every relation it holds.
    pub async fn delete_principal(&self, principal_id: u64) -> Result<usize> {
        let removed = self.store.delete_principal_node(PrincipalId(principal_id)).await?;
        info!("Deleted principal {} ({} edges)", principal_id, removed);
        Ok(removed)
    }

    /// Remove a resource and every relation into or out of it.
    pub async fn delete_resource(&self, namespace: &str, resource_id: u64) -> Result<usize> {
        let resource = Resource::new(namespace, resource_id)?;
        let removed = self.store.delete_resource_node(&resource).await?;
        info!("Deleted resource {} ({} edges)", resource, removed);
        Ok(removed)
    }

    /// Remove every principal, resource and relation.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self.store.clear().await?;
        info!("Cleared relationship graph ({} edges)", removed);
        Ok(removed)
    }

    pub async fn apply_tuple(&self, tuple: &RelationshipTuple) -> Result<bool> {
        self.store.upsert_edge(&tuple.to_edge()).await
    }

    pub async fn remove_tuple(&self, tuple: &RelationshipTuple) -> Result<bool> {
        self.store.delete_edge(&tuple.to_edge()).await
    }

    async fn import_line(&self, report: &mut ImportReport, line_number: usize, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            report.skipped += 1;
            return;
        }

        let outcome = match trimmed.parse::<RelationshipTuple>() {
            Ok(tuple) => self.apply_tuple(&tuple).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(true) => report.applied += 1,
            Ok(false) => report.unchanged += 1,
            Err(error) => {
                warn!(line_number, line = trimmed, %error, "Skipping seed line");
                report.failures.push(ImportFailure {
                    line_number,
                    line: trimmed.to_string(),
                    error,
                });
            }
        }
    }

    /// Apply every line of `text`, one tuple per line.
    pub async fn import_str(&self, text: &str) -> ImportReport {
        let mut report = ImportReport::default();
        for (idx, line) in text.lines().enumerate() {
            self.import_line(&mut report, idx + 1, line).await;
        }
        log_report(&report);
        report
    }

    /// Stream tuples from a reader. Fails only if reading itself fails;
    /// lines applied before that point stay applied.
    pub async fn import_reader<R>(&self, reader: R) -> Result<ImportReport>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut report = ImportReport::default();
        let mut lines = reader.lines();
        let mut line_number = 0;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| RebacError::StorageError(format!("failed to read seed input: {}", e)))?
        {
            line_number += 1;
            self.import_line(&mut report, line_number, &line).await;
        }
        log_report(&report);
        Ok(report)
    }

    pub async fn import_file(&self, path: impl AsRef<Path>) -> Result<ImportReport> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            RebacError::StorageError(format!("cannot open seed file {}: {}", path.display(), e))
        })?;
        info!("Importing seed file {}", path.display());
        self.import_reader(BufReader::new(file)).await
    }
}

fn log_report(report: &ImportReport) {
    info!(
        applied = report.applied,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failed = report.failures.len(),
        "Seed import finished"
    );
}
