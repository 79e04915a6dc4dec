use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use camino::Utf8PathBuf;
use rayon::prelude::*;
use serde::Serialize;
use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::PipelineSection;
use crate::domain::AssemblyRecord;
use crate::error::GenomaError;
use crate::store::{AssemblyFiles, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Decompress,
    BuildSequenceIndex,
    ConvertAnnotation,
    DeriveSpliceSites,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Decompress => "decompress",
            PipelineStep::BuildSequenceIndex => "build_sequence_index",
            PipelineStep::ConvertAnnotation => "convert_annotation",
            PipelineStep::DeriveSpliceSites => "derive_splice_sites",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One external process run. When `stdout` is set the process output is
/// captured into that file. Any populated file among `output` and
/// `alternate_outputs` marks the step as done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub step: PipelineStep,
    pub program: String,
    pub args: Vec<String>,
    pub inputs: Vec<Utf8PathBuf>,
    pub stdout: Option<Utf8PathBuf>,
    pub output: Utf8PathBuf,
    pub alternate_outputs: Vec<Utf8PathBuf>,
}

impl Invocation {
    pub fn produced(&self) -> Option<&Utf8PathBuf> {
        std::iter::once(&self.output)
            .chain(&self.alternate_outputs)
            .find(|path| Store::is_populated(path))
    }

    pub fn is_done(&self) -> bool {
        self.produced().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutcome, GenomaError>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutcome, GenomaError> {
        let program = resolve_program(&invocation.program)
            .ok_or_else(|| GenomaError::MissingTool(invocation.program.clone()))?;
        let mut cmd = Command::new(program);
        cmd.args(&invocation.args).stdin(Stdio::null());

        let Some(target) = &invocation.stdout else {
            let output = cmd
                .output()
                .map_err(|err| GenomaError::MissingTool(format!("{}: {err}", invocation.program)))?;
            return Ok(ToolOutcome {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        };

        let parent = target
            .parent()
            .ok_or_else(|| GenomaError::Filesystem(format!("invalid output path {target}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix(".genoma-step")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        let sink = temp
            .as_file()
            .try_clone()
            .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        let output = cmd
            .stdout(Stdio::from(sink))
            .output()
            .map_err(|err| GenomaError::MissingTool(format!("{}: {err}", invocation.program)))?;
        let outcome = ToolOutcome {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        if outcome.success() {
            temp.persist(target.as_std_path())
                .map_err(|err| GenomaError::Filesystem(err.to_string()))?;
        }
        Ok(outcome)
    }
}

fn resolve_program(name: &str) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return path.exists().then_some(path);
    }
    find_in_path(name)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

#[derive(Debug, Clone)]
pub struct ToolSet {
    gzip: String,
    hisat2_build: String,
    gffread: String,
    extract_splice_sites: String,
    index_threads: usize,
}

impl From<&PipelineSection> for ToolSet {
    fn from(section: &PipelineSection) -> Self {
        Self {
            gzip: section.gzip.clone(),
            hisat2_build: section.hisat2_build.clone(),
            gffread: section.gffread.clone(),
            extract_splice_sites: section.extract_splice_sites.clone(),
            index_threads: section.index_threads.max(1),
        }
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::from(&PipelineSection::default())
    }
}

impl ToolSet {
    pub fn plan(&self, files: &AssemblyFiles) -> Vec<Invocation> {
        let [index_marker, large_index_marker] = files.index_markers();
        vec![
            Invocation {
                step: PipelineStep::Decompress,
                program: self.gzip.clone(),
                args: vec!["-dc".to_string(), files.sequence_archive.to_string()],
                inputs: vec![files.sequence_archive.clone()],
                stdout: Some(files.sequence.clone()),
                output: files.sequence.clone(),
                alternate_outputs: Vec::new(),
            },
            Invocation {
                step: PipelineStep::Decompress,
                program: self.gzip.clone(),
                args: vec!["-dc".to_string(), files.annotation_archive.to_string()],
                inputs: vec![files.annotation_archive.clone()],
                stdout: Some(files.annotation.clone()),
                output: files.annotation.clone(),
                alternate_outputs: Vec::new(),
            },
            Invocation {
                step: PipelineStep::BuildSequenceIndex,
                program: self.hisat2_build.clone(),
                args: vec![
                    "-p".to_string(),
                    self.index_threads.to_string(),
                    files.sequence.to_string(),
                    files.index_prefix.to_string(),
                ],
                inputs: vec![files.sequence.clone()],
                stdout: None,
                output: index_marker,
                alternate_outputs: vec![large_index_marker],
            },
            Invocation {
                step: PipelineStep::ConvertAnnotation,
                program: self.gffread.clone(),
                args: vec![
                    files.annotation.to_string(),
                    "-T".to_string(),
                    "-o".to_string(),
                    files.converted_annotation.to_string(),
                ],
                inputs: vec![files.annotation.clone()],
                stdout: None,
                output: files.converted_annotation.clone(),
                alternate_outputs: Vec::new(),
            },
            Invocation {
                step: PipelineStep::DeriveSpliceSites,
                program: self.extract_splice_sites.clone(),
                args: vec![files.converted_annotation.to_string()],
                inputs: vec![files.converted_annotation.clone()],
                stdout: Some(files.splice_sites.clone()),
                output: files.splice_sites.clone(),
                alternate_outputs: Vec::new(),
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Ran,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: PipelineStep,
    pub output: String,
    pub action: StepAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PrepareStatus {
    Completed,
    Failed {
        step: PipelineStep,
        exit_code: Option<i32>,
        message: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrepareReport {
    pub key: String,
    pub status: PrepareStatus,
    pub steps: Vec<StepRecord>,
}

impl PrepareReport {
    pub fn is_completed(&self) -> bool {
        self.status == PrepareStatus::Completed
    }

    pub fn failure(&self) -> Option<GenomaError> {
        match &self.status {
            PrepareStatus::Failed {
                step,
                exit_code,
                message,
            } => Some(GenomaError::StepFailed {
                assembly: self.key.clone(),
                step: step.to_string(),
                exit_code: *exit_code,
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

pub struct PreparationPipeline<T: ToolRunner> {
    store: Store,
    tools: ToolSet,
    runner: T,
    workers: usize,
}

impl<T: ToolRunner> PreparationPipeline<T> {
    pub fn new(store: Store, tools: ToolSet, runner: T, workers: usize) -> Self {
        Self {
            store,
            tools,
            runner,
            workers,
        }
    }

    pub fn runner(&self) -> &T {
        &self.runner
    }

    pub fn prepare_one(&self, record: &AssemblyRecord, cancel: &CancellationToken) -> PrepareReport {
        let key = record.key();
        let files = self.store.assembly_files(&record.identity());
        let mut steps = Vec::new();

        for invocation in self.tools.plan(&files) {
            if cancel.is_cancelled() {
                info!(key = %key, step = %invocation.step, "preparation cancelled");
                return PrepareReport {
                    key,
                    status: PrepareStatus::Cancelled,
                    steps,
                };
            }
            if let Some(output) = invocation.produced() {
                debug!(key = %key, step = %invocation.step, output = %output, "step already done");
                steps.push(StepRecord {
                    step: invocation.step,
                    output: output.to_string(),
                    action: StepAction::Skipped,
                });
                continue;
            }
            if let Err((exit_code, message)) = self.run_step(&invocation) {
                warn!(key = %key, step = %invocation.step, ?exit_code, message = %message, "step failed");
                discard_partial(&invocation, &files);
                return PrepareReport {
                    key,
                    status: PrepareStatus::Failed {
                        step: invocation.step,
                        exit_code,
                        message,
                    },
                    steps,
                };
            }
            let output = invocation.produced().unwrap_or(&invocation.output);
            info!(key = %key, step = %invocation.step, output = %output, "step completed");
            steps.push(StepRecord {
                step: invocation.step,
                output: output.to_string(),
                action: StepAction::Ran,
            });
        }

        PrepareReport {
            key,
            status: PrepareStatus::Completed,
            steps,
        }
    }

    fn run_step(&self, invocation: &Invocation) -> Result<(), (Option<i32>, String)> {
        if let Some(missing) = invocation
            .inputs
            .iter()
            .find(|input| !Store::is_populated(input))
        {
            return Err((None, format!("missing input {missing}")));
        }
        let outcome = self
            .runner
            .run(invocation)
            .map_err(|err| (None, err.to_string()))?;
        if !outcome.success() {
            let message = if outcome.stderr.is_empty() {
                format!("{} exited unsuccessfully", invocation.program)
            } else {
                outcome.stderr
            };
            return Err((outcome.exit_code, message));
        }
        if !invocation.is_done() {
            return Err((
                outcome.exit_code,
                format!("{} produced no {}", invocation.program, invocation.output),
            ));
        }
        Ok(())
    }

    /// Prepares records on a bounded worker pool. One record's failure never
    /// stops the others; reports come back in input order.
    pub fn prepare_all(
        &self,
        records: &[AssemblyRecord],
        cancel: &CancellationToken,
    ) -> Result<Vec<PrepareReport>, GenomaError> {
        let threads = match self.workers {
            0 => std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1),
            workers => workers,
        };
        if threads <= 1 || records.len() <= 1 {
            return Ok(records
                .iter()
                .map(|record| self.prepare_one(record, cancel))
                .collect());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|err| GenomaError::WorkerPool(err.to_string()))?;
        Ok(pool.install(|| {
            records
                .par_iter()
                .map(|record| self.prepare_one(record, cancel))
                .collect()
        }))
    }
}

fn discard_partial(invocation: &Invocation, files: &AssemblyFiles) {
    let removed = if invocation.step == PipelineStep::BuildSequenceIndex {
        Store::remove_index_files(&files.index_prefix).map(|_| ())
    } else {
        std::iter::once(&invocation.output)
            .chain(&invocation.alternate_outputs)
            .try_for_each(|path| Store::remove_if_present(path).map(|_| ()))
    };
    if let Err(err) = removed {
        warn!(step = %invocation.step, error = %err, "could not discard partial output");
    }
}
