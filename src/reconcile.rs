use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::domain::{AssemblyIdentity, AssemblyRecord, FileRole, ParsedLeaf, SourceDatabase};
use crate::error::GenomaError;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub identity: AssemblyIdentity,
    pub role: FileRole,
    pub remote_path: String,
    pub remote_size: u64,
    pub version: Option<String>,
    pub source: SourceDatabase,
}

impl Discovery {
    pub fn from_leaf(
        leaf: ParsedLeaf,
        containing_path: &str,
        version: Option<String>,
        source: SourceDatabase,
    ) -> Self {
        Self {
            remote_path: format!("{containing_path}{}", leaf.filename),
            identity: leaf.identity,
            role: leaf.role,
            remote_size: leaf.size,
            version,
            source,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CrawlAccumulator {
    #[serde(skip)]
    records: BTreeMap<String, AssemblyRecord>,
    pub parsed: usize,
    pub parse_failures: usize,
    pub excluded: usize,
    pub unclassified: usize,
}

impl CrawlAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> impl Iterator<Item = &AssemblyRecord> {
        self.records.values()
    }

    pub fn get(&self, key: &str) -> Option<&AssemblyRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<AssemblyRecord> {
        self.records.into_values().collect()
    }
}

/// Folds discoveries into records keyed by identity. Each discovery only
/// carries its own role's fields, so the sequence and annotation halves of
/// a record never overwrite each other regardless of arrival order.
pub struct RecordReconciler<'a> {
    catalog: &'a Catalog,
    store: &'a Store,
}

impl<'a> RecordReconciler<'a> {
    pub fn new(catalog: &'a Catalog, store: &'a Store) -> Self {
        Self { catalog, store }
    }

    pub fn reconcile(
        &self,
        accumulator: &mut CrawlAccumulator,
        discovery: Discovery,
    ) -> Result<AssemblyRecord, GenomaError> {
        let key = discovery.identity.key();
        let mut update = AssemblyRecord::new(discovery.identity, discovery.source);
        update.version = discovery.version;
        update.base_filepath = Some(self.store.assembly_dir(&update.identity()).to_string());
        update.set_remote_file(discovery.role, discovery.remote_path, discovery.remote_size);

        let stored = self.catalog.upsert(&update)?;
        accumulator.records.insert(key, stored.clone());
        Ok(stored)
    }
}
