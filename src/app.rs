use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::catalog::{Catalog, FieldUpdate};
use crate::config::ResolvedConfig;
use crate::domain::{AssemblyRecord, FieldValue, RecordField, SourceDatabase, TaxonomyId};
use crate::error::GenomaError;
use crate::pipeline::{PrepareReport, PrepareStatus, PreparationPipeline, ToolRunner, ToolSet};
use crate::reconcile::{CrawlAccumulator, RecordReconciler};
use crate::source::{AssemblySource, CrawlReport, FileDownload};
use crate::sra::{AccessionCataloger, EutilsClient, TaxonAccessions};
use crate::store::Store;
use crate::taxonomy::{self, TaxonomyClient};

#[derive(Debug, Clone, Serialize)]
pub struct DiscoverResult {
    pub sources: Vec<CrawlReport>,
    pub records_touched: usize,
    pub complete_records: usize,
    pub catalog_size: usize,
    pub parsed: usize,
    pub parse_failures: usize,
    pub excluded: usize,
    pub unclassified: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub key: String,
    pub complete: bool,
    #[serde(flatten)]
    pub record: AssemblyRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub assemblies: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    pub key: String,
    pub ok: bool,
    pub error: Option<String>,
    pub files: Vec<FileDownload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrepareResult {
    pub reports: Vec<PrepareReport>,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaxonomyResult {
    pub records: usize,
    pub updated: usize,
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaxonFailure {
    pub taxonomy_id: TaxonomyId,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SraResult {
    pub taxa: Vec<TaxonAccessions>,
    pub failures: Vec<TaxonFailure>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn timed(message: impl Into<String>, start: Instant) -> Self {
        Self {
            message: message.into(),
            elapsed: Some(start.elapsed()),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<E: EutilsClient, T: ToolRunner, X: TaxonomyClient> {
    config: ResolvedConfig,
    catalog: Catalog,
    store: Store,
    sources: BTreeMap<SourceDatabase, Box<dyn AssemblySource>>,
    pipeline: PreparationPipeline<T>,
    cataloger: AccessionCataloger<E>,
    taxonomy: X,
}

impl<E: EutilsClient, T: ToolRunner, X: TaxonomyClient> App<E, T, X> {
    pub fn new(
        config: ResolvedConfig,
        catalog: Catalog,
        eutils: E,
        runner: T,
        taxonomy: X,
    ) -> Self {
        let store = Store::new(config.storage_root.clone());
        let pipeline = PreparationPipeline::new(
            store.clone(),
            ToolSet::from(&config.pipeline),
            runner,
            config.pipeline.workers,
        );
        let cataloger = AccessionCataloger::new(eutils, config.sra_root.clone(), &config.sra);
        Self {
            config,
            catalog,
            store,
            sources: BTreeMap::new(),
            pipeline,
            cataloger,
            taxonomy,
        }
    }

    pub fn with_source(mut self, source: Box<dyn AssemblySource>) -> Self {
        self.register_source(source);
        self
    }

    pub fn register_source(&mut self, source: Box<dyn AssemblySource>) {
        self.sources.insert(source.tag(), source);
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Crawls every registered source into the catalog. Parse failures and
    /// failed roots are counted, not fatal.
    pub fn discover(
        &mut self,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<DiscoverResult, GenomaError> {
        self.store.ensure_root()?;
        let reconciler = RecordReconciler::new(&self.catalog, &self.store);
        let mut accumulator = CrawlAccumulator::new();
        let mut reports = Vec::with_capacity(self.sources.len());

        for (tag, source) in self.sources.iter_mut() {
            let start = Instant::now();
            sink.event(ProgressEvent::message(format!("phase=Crawl; source {tag}")));
            let report = source.crawl(&reconciler, &mut accumulator, cancel)?;
            sink.event(ProgressEvent::timed(
                format!(
                    "phase=Crawl; source {tag} done, {} root(s) failed",
                    report.failed_roots()
                ),
                start,
            ));
            reports.push(report);
        }

        let complete_records = accumulator
            .records()
            .filter(|record| record.is_complete())
            .count();
        Ok(DiscoverResult {
            sources: reports,
            records_touched: accumulator.len(),
            complete_records,
            catalog_size: self.catalog.count()?,
            parsed: accumulator.parsed,
            parse_failures: accumulator.parse_failures,
            excluded: accumulator.excluded,
            unclassified: accumulator.unclassified,
        })
    }

    pub fn list(
        &self,
        filter: Option<(RecordField, FieldValue)>,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, GenomaError> {
        sink.event(ProgressEvent::message("phase=Resolve; reading catalog"));
        let records = match filter {
            Some((field, value)) => self.find(field, &value)?,
            None => self.catalog.query_all()?,
        };
        Ok(ListResult {
            assemblies: records
                .into_iter()
                .map(|record| ListEntry {
                    key: record.key(),
                    complete: record.is_complete(),
                    record,
                })
                .collect(),
        })
    }

    pub fn find(
        &self,
        field: RecordField,
        value: &FieldValue,
    ) -> Result<Vec<AssemblyRecord>, GenomaError> {
        field.check(value)?;
        self.catalog.query_by(field, value)
    }

    pub fn download(
        &mut self,
        keys: &[String],
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, GenomaError> {
        let records = self.select(keys)?;
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            cancel.check()?;
            let key = record.key();
            let start = Instant::now();
            sink.event(ProgressEvent::message(format!("phase=Download; {key}")));
            let files = self.store.assembly_files(&record.identity());
            let outcome = match self.sources.get_mut(&record.source_database) {
                Some(source) => source.download(&record, &files, cancel),
                None => Err(GenomaError::UnknownSource(
                    record.source_database.to_string(),
                )),
            };
            match outcome {
                Ok(report) => {
                    sink.event(ProgressEvent::timed(format!("phase=Download; {key} done"), start));
                    items.push(DownloadItem {
                        key,
                        ok: true,
                        error: None,
                        files: report.files,
                    });
                }
                Err(GenomaError::Cancelled) => return Err(GenomaError::Cancelled),
                Err(err) => {
                    warn!(key = %key, error = %err, "download failed");
                    items.push(DownloadItem {
                        key,
                        ok: false,
                        error: Some(err.to_string()),
                        files: Vec::new(),
                    });
                }
            }
        }
        Ok(DownloadResult { items })
    }

    pub fn prepare(
        &self,
        keys: &[String],
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<PrepareResult, GenomaError> {
        let records = self.select(keys)?;
        let start = Instant::now();
        sink.event(ProgressEvent::message(format!(
            "phase=Prepare; {} record(s)",
            records.len()
        )));
        let reports = self.pipeline.prepare_all(&records, cancel)?;
        let count = |wanted: fn(&PrepareStatus) -> bool| {
            reports.iter().filter(|report| wanted(&report.status)).count()
        };
        let completed = count(|status| matches!(status, PrepareStatus::Completed));
        let failed = count(|status| matches!(status, PrepareStatus::Failed { .. }));
        let cancelled = count(|status| matches!(status, PrepareStatus::Cancelled));
        sink.event(ProgressEvent::timed(
            format!("phase=Prepare; {completed} completed, {failed} failed"),
            start,
        ));
        Ok(PrepareResult {
            reports,
            completed,
            failed,
            cancelled,
        })
    }

    /// Resolves taxonomy ids for every catalogued record and writes the
    /// updates in one batch. Unresolved species keep a null id.
    pub fn resolve_taxonomy(&self, sink: &dyn ProgressSink) -> Result<TaxonomyResult, GenomaError> {
        let start = Instant::now();
        sink.event(ProgressEvent::message("phase=Resolve; loading taxonomy table"));
        let table = taxonomy::load_or_download(
            &self.taxonomy,
            &self.config.taxonomy_table,
            &self.config.taxonomy.download_url,
        )?;

        let records = self.catalog.query_all()?;
        let mut by_source: BTreeMap<SourceDatabase, Vec<AssemblyRecord>> = BTreeMap::new();
        for record in &records {
            by_source
                .entry(record.source_database)
                .or_default()
                .push(record.clone());
        }
        let mut batch: Vec<(String, Vec<FieldUpdate>)> = Vec::new();
        for (tag, group) in &by_source {
            match self.sources.get(tag) {
                Some(source) => batch.extend(source.resolve_taxonomy(&table, group)),
                None => batch.extend(table.resolve_all(group)),
            }
        }
        let updated = self.catalog.apply_updates(&batch)?;

        let resolved: BTreeSet<&str> = batch.iter().map(|(key, _)| key.as_str()).collect();
        let unresolved = records
            .iter()
            .filter(|record| record.taxonomy_id.is_none())
            .map(AssemblyRecord::key)
            .filter(|key| !resolved.contains(key.as_str()))
            .collect();
        sink.event(ProgressEvent::timed(
            format!("phase=Resolve; {updated} record(s) updated"),
            start,
        ));
        Ok(TaxonomyResult {
            records: records.len(),
            updated,
            unresolved,
        })
    }

    pub fn catalog_accessions(
        &self,
        taxonomy_ids: &[TaxonomyId],
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<SraResult, GenomaError> {
        let targets = if taxonomy_ids.is_empty() {
            self.catalogued_taxa()?
        } else {
            taxonomy_ids.to_vec()
        };

        let mut taxa = Vec::new();
        let mut failures = Vec::new();
        for taxonomy_id in targets {
            cancel.check()?;
            let start = Instant::now();
            sink.event(ProgressEvent::message(format!("phase=Sra; txid{taxonomy_id}")));
            match self.cataloger.catalog_accessions_for(&taxonomy_id, cancel) {
                Ok(found) => {
                    sink.event(ProgressEvent::timed(
                        format!(
                            "phase=Sra; txid{taxonomy_id}: {} accession(s)",
                            found.accessions.len()
                        ),
                        start,
                    ));
                    taxa.push(found);
                }
                Err(GenomaError::Cancelled) => return Err(GenomaError::Cancelled),
                Err(err) => {
                    warn!(taxonomy_id = %taxonomy_id, error = %err, "accession search failed");
                    failures.push(TaxonFailure {
                        taxonomy_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(SraResult { taxa, failures })
    }

    fn catalogued_taxa(&self) -> Result<Vec<TaxonomyId>, GenomaError> {
        let mut seen = BTreeSet::new();
        for record in self.catalog.query_all()? {
            let Some(raw) = record.taxonomy_id.as_deref() else {
                continue;
            };
            match raw.parse::<TaxonomyId>() {
                Ok(id) => {
                    seen.insert(id.as_str().to_string());
                }
                Err(err) => warn!(key = %record.key(), error = %err, "ignoring stored taxonomy id"),
            }
        }
        seen.into_iter().map(|raw| raw.parse()).collect()
    }

    fn select(&self, keys: &[String]) -> Result<Vec<AssemblyRecord>, GenomaError> {
        if keys.is_empty() {
            return self.catalog.query_all();
        }
        keys.iter()
            .map(|key| {
                self.catalog
                    .get(key)?
                    .ok_or_else(|| GenomaError::AssemblyNotFound(key.clone()))
            })
            .collect()
    }
}
