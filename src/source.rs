use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::catalog::FieldUpdate;
use crate::config::EnsemblSection;
use crate::domain::{AssemblyRecord, FileRole, SourceDatabase};
use crate::error::GenomaError;
use crate::parser::{FilenameParser, LeafOutcome, ParserPolicy};
use crate::reconcile::{CrawlAccumulator, Discovery, RecordReconciler};
use crate::remote::{FtpRemote, RemoteTree};
use crate::store::{AssemblyFiles, Store};
use crate::taxonomy::TaxonomyTable;
use crate::walker::{DirectoryWalker, WalkPolicy, WalkStats};

static RELEASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"release-\d+").expect("release pattern compiles"));

#[derive(Debug, Clone, Serialize)]
pub struct RootReport {
    pub root: String,
    pub stats: WalkStats,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub source: SourceDatabase,
    pub roots: Vec<RootReport>,
}

impl CrawlReport {
    pub fn failed_roots(&self) -> usize {
        self.roots.iter().filter(|root| root.error.is_some()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadAction {
    Fetched,
    Skipped,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileDownload {
    pub role: FileRole,
    pub path: String,
    pub action: DownloadAction,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub key: String,
    pub files: Vec<FileDownload>,
}

pub trait AssemblySource {
    fn tag(&self) -> SourceDatabase;

    fn crawl(
        &mut self,
        reconciler: &RecordReconciler<'_>,
        accumulator: &mut CrawlAccumulator,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport, GenomaError>;

    fn download(
        &mut self,
        record: &AssemblyRecord,
        files: &AssemblyFiles,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, GenomaError>;

    fn resolve_taxonomy(
        &self,
        table: &TaxonomyTable,
        records: &[AssemblyRecord],
    ) -> Vec<(String, Vec<FieldUpdate>)> {
        table.resolve_all(records)
    }
}

pub struct EnsemblSource<R: RemoteTree> {
    remote: R,
    walker: DirectoryWalker,
    parser: FilenameParser,
    roots: Vec<String>,
    release: String,
}

impl EnsemblSource<FtpRemote> {
    pub fn from_config(section: &EnsemblSection) -> Self {
        Self::new(FtpRemote::new(section.ftp_host.clone()), section)
    }
}

impl<R: RemoteTree> EnsemblSource<R> {
    pub fn new(remote: R, section: &EnsemblSection) -> Self {
        Self {
            remote,
            walker: DirectoryWalker::new(WalkPolicy::new(
                section.ignored_dirs.iter().cloned(),
                section.max_depth,
            )),
            parser: FilenameParser::new(ParserPolicy::from(section)),
            roots: section.crawl_roots(),
            release: section.release.clone(),
        }
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn release(&self) -> &str {
        &self.release
    }
}

pub fn release_label(path: &str) -> Option<String> {
    RELEASE_RE.find(path).map(|found| found.as_str().to_string())
}

impl<R: RemoteTree> AssemblySource for EnsemblSource<R> {
    fn tag(&self) -> SourceDatabase {
        SourceDatabase::Ensembl
    }

    /// Walks each root separately so a listing failure under one root only
    /// loses that root. Catalog failures and cancellation stop the crawl.
    fn crawl(
        &mut self,
        reconciler: &RecordReconciler<'_>,
        accumulator: &mut CrawlAccumulator,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport, GenomaError> {
        let Self {
            remote,
            walker,
            parser,
            roots,
            release,
        } = self;
        let mut reports = Vec::with_capacity(roots.len());
        for root in roots.iter() {
            cancel.check()?;
            info!(root = %root, "crawling");
            let mut stats = WalkStats::default();
            let result = walker.walk_into(
                remote,
                std::slice::from_ref(root),
                cancel,
                &mut stats,
                |line, containing_path| {
                    match parser.parse(line) {
                        Ok(LeafOutcome::Parsed(leaf)) => {
                            accumulator.parsed += 1;
                            let version = release_label(containing_path)
                                .unwrap_or_else(|| release.clone());
                            let discovery = Discovery::from_leaf(
                                leaf,
                                containing_path,
                                Some(version),
                                SourceDatabase::Ensembl,
                            );
                            reconciler.reconcile(accumulator, discovery)?;
                        }
                        Ok(LeafOutcome::Excluded) => accumulator.excluded += 1,
                        Ok(LeafOutcome::Unclassified) => accumulator.unclassified += 1,
                        Err(err) => {
                            accumulator.parse_failures += 1;
                            warn!(error = %err, path = containing_path, "skipping leaf");
                        }
                    }
                    Ok(())
                },
            );
            match result {
                Ok(()) => reports.push(RootReport {
                    root: root.clone(),
                    stats,
                    error: None,
                }),
                Err(
                    err @ (GenomaError::RemoteListing { .. } | GenomaError::RemoteConnection(_)),
                ) => {
                    warn!(root = %root, error = %err, "root crawl aborted");
                    reports.push(RootReport {
                        root: root.clone(),
                        stats,
                        error: Some(err.to_string()),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(CrawlReport {
            source: SourceDatabase::Ensembl,
            roots: reports,
        })
    }

    fn download(
        &mut self,
        record: &AssemblyRecord,
        files: &AssemblyFiles,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, GenomaError> {
        let mut report = DownloadReport {
            key: record.key(),
            files: Vec::with_capacity(2),
        };
        for role in [FileRole::Sequence, FileRole::Annotation] {
            let destination = files.archive(role);
            let Some((remote_path, remote_size)) = record.remote_file(role) else {
                debug!(key = %report.key, %role, "no remote file for role");
                report.files.push(FileDownload {
                    role,
                    path: destination.to_string(),
                    action: DownloadAction::Missing,
                    bytes: None,
                });
                continue;
            };

            let local_size = Store::file_size(destination);
            if local_size.is_some() && local_size == remote_size {
                debug!(path = %destination, "already downloaded");
                report.files.push(FileDownload {
                    role,
                    path: destination.to_string(),
                    action: DownloadAction::Skipped,
                    bytes: local_size,
                });
                continue;
            }

            cancel.check()?;
            info!(remote = remote_path, local = %destination, "fetching");
            let written = self.remote.fetch(remote_path, destination)?;
            if let Some(expected) = remote_size {
                if written != expected {
                    return Err(GenomaError::RemoteFetch {
                        path: remote_path.to_string(),
                        message: format!("expected {expected} bytes, received {written}"),
                    });
                }
            }
            report.files.push(FileDownload {
                role,
                path: destination.to_string(),
                action: DownloadAction::Fetched,
                bytes: Some(written),
            });
        }
        Ok(report)
    }
}
