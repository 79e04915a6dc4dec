use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{
    DiscoverResult, DownloadResult, ListResult, PrepareResult, ProgressEvent, ProgressSink,
    SraResult, TaxonomyResult,
};
use crate::pipeline::PrepareStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// JSON mode keeps stdout machine-readable, so progress is dropped.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_list(result: &ListResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for entry in &result.assemblies {
            let record = &entry.record;
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                entry.key,
                record.version.as_deref().unwrap_or("-"),
                record.source_database,
                if entry.complete { "complete" } else { "partial" },
                record.taxonomy_id.as_deref().unwrap_or("-"),
            )?;
        }
        writeln!(out, "{} assembl(ies)", result.assemblies.len())
    }

    pub fn print_discover(result: &DiscoverResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for source in &result.sources {
            for root in &source.roots {
                match &root.error {
                    Some(error) => writeln!(out, "{} {}: FAILED {error}", source.source, root.root)?,
                    None => writeln!(
                        out,
                        "{} {}: {} dirs, {} leaves",
                        source.source, root.root, root.stats.directories_listed, root.stats.leaves
                    )?,
                }
            }
        }
        writeln!(
            out,
            "records: {} touched, {} complete, {} in catalog",
            result.records_touched, result.complete_records, result.catalog_size
        )?;
        writeln!(
            out,
            "leaves: {} parsed, {} unparseable, {} excluded, {} unclassified",
            result.parsed, result.parse_failures, result.excluded, result.unclassified
        )
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for item in &result.items {
            match &item.error {
                Some(error) => writeln!(out, "{}: FAILED {error}", item.key)?,
                None => {
                    let actions: Vec<String> = item
                        .files
                        .iter()
                        .map(|file| format!("{}={:?}", file.role, file.action).to_lowercase())
                        .collect();
                    writeln!(out, "{}: {}", item.key, actions.join(" "))?;
                }
            }
        }
        Ok(())
    }

    pub fn print_prepare(result: &PrepareResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for report in &result.reports {
            match &report.status {
                PrepareStatus::Completed => writeln!(out, "{}: completed", report.key)?,
                PrepareStatus::Cancelled => writeln!(out, "{}: cancelled", report.key)?,
                PrepareStatus::Failed {
                    step,
                    exit_code,
                    message,
                } => writeln!(
                    out,
                    "{}: FAILED at {step} (exit {}): {message}",
                    report.key,
                    exit_code.map_or_else(|| "none".to_string(), |code| code.to_string())
                )?,
            }
        }
        writeln!(
            out,
            "{} completed, {} failed, {} cancelled",
            result.completed, result.failed, result.cancelled
        )
    }

    pub fn print_taxonomy(result: &TaxonomyResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for key in &result.unresolved {
            writeln!(out, "unresolved: {key}")?;
        }
        writeln!(
            out,
            "{} of {} record(s) updated",
            result.updated, result.records
        )
    }

    pub fn print_sra(result: &SraResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for taxon in &result.taxa {
            for entry in &taxon.accessions {
                writeln!(out, "{}\t{}\t{}", taxon.taxonomy_id, entry.accession, entry.path)?;
            }
        }
        for failure in &result.failures {
            writeln!(out, "txid{}: FAILED {}", failure.taxonomy_id, failure.error)?;
        }
        Ok(())
    }
}
