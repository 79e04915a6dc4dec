mod common;

use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8Path;

use common::temp_root;
use genoma::cancel::CancellationToken;
use genoma::domain::{AssemblyIdentity, AssemblyRecord, SourceDatabase};
use genoma::error::GenomaError;
use genoma::pipeline::{
    Invocation, PipelineStep, PrepareReport, PrepareStatus, PreparationPipeline, StepAction,
    ToolOutcome, ToolRunner, ToolSet,
};
use genoma::store::Store;

/// Records every invocation and writes a stand-in artifact unless told to
/// fail for a given record and step.
#[derive(Default)]
struct CountingRunner {
    calls: Mutex<Vec<(String, PipelineStep)>>,
    fail: Option<(String, PipelineStep)>,
    skip_output: bool,
    partial_on_fail: bool,
    large_index: bool,
}

impl CountingRunner {
    fn failing(key: &str, step: PipelineStep) -> Self {
        Self {
            fail: Some((key.to_string(), step)),
            ..Self::default()
        }
    }

    fn calls_for(&self, key: &str) -> Vec<PipelineStep> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(output, _)| output.contains(key))
            .map(|(_, step)| *step)
            .collect()
    }

    fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl ToolRunner for CountingRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutcome, GenomaError> {
        self.calls
            .lock()
            .unwrap()
            .push((invocation.output.to_string(), invocation.step));
        if let Some((key, step)) = &self.fail {
            if invocation.output.as_str().contains(key.as_str()) && *step == invocation.step {
                if self.partial_on_fail {
                    write_partial(invocation);
                }
                return Ok(ToolOutcome {
                    exit_code: Some(2),
                    stderr: "boom".to_string(),
                });
            }
        }
        if self.large_index && invocation.step == PipelineStep::BuildSequenceIndex {
            let prefix = &invocation.args[3];
            for n in 1..=2 {
                Store::write_bytes_atomic(Utf8Path::new(&format!("{prefix}.{n}.ht2l")), b"index")?;
            }
        } else if !self.skip_output {
            let target = invocation.stdout.as_ref().unwrap_or(&invocation.output);
            Store::write_bytes_atomic(target, b"artifact")?;
        }
        Ok(ToolOutcome {
            exit_code: Some(0),
            stderr: String::new(),
        })
    }
}

fn write_partial(invocation: &Invocation) {
    if invocation.step == PipelineStep::BuildSequenceIndex {
        let prefix = &invocation.args[3];
        for n in 1..=2 {
            Store::write_bytes_atomic(Utf8Path::new(&format!("{prefix}.{n}.ht2")), b"half").unwrap();
        }
    } else {
        let target = invocation.stdout.as_ref().unwrap_or(&invocation.output);
        Store::write_bytes_atomic(target, b"half").unwrap();
    }
}

fn action_of(report: &PrepareReport, step: PipelineStep) -> Option<StepAction> {
    report
        .steps
        .iter()
        .find(|record| record.step == step)
        .map(|record| record.action)
}

fn record(genus: &str, species: &str, assembly: &str) -> AssemblyRecord {
    AssemblyRecord::new(
        AssemblyIdentity::new(genus, species, None, assembly),
        SourceDatabase::Ensembl,
    )
}

fn seed_archives(store: &Store, record: &AssemblyRecord) {
    let files = store.assembly_files(&record.identity());
    Store::write_bytes_atomic(&files.sequence_archive, b"seq.gz").unwrap();
    Store::write_bytes_atomic(&files.annotation_archive, b"gff.gz").unwrap();
}

fn pipeline(root: &Utf8Path, runner: CountingRunner, workers: usize) -> PreparationPipeline<CountingRunner> {
    PreparationPipeline::new(
        Store::new(root.to_path_buf()),
        ToolSet::default(),
        runner,
        workers,
    )
}

#[test]
fn rerun_invokes_nothing() {
    let (_temp, root) = temp_root();
    let store = Store::new(root.clone());
    let maize = record("Zea", "mays", "AGPv4");
    seed_archives(&store, &maize);

    let first = pipeline(&root, CountingRunner::default(), 1);
    let report = first.prepare_one(&maize, &CancellationToken::new());
    assert_eq!(report.status, PrepareStatus::Completed);
    assert_eq!(
        first.runner().calls_for("Zea_mays-AGPv4"),
        vec![
            PipelineStep::Decompress,
            PipelineStep::Decompress,
            PipelineStep::BuildSequenceIndex,
            PipelineStep::ConvertAnnotation,
            PipelineStep::DeriveSpliceSites,
        ]
    );

    let second = pipeline(&root, CountingRunner::default(), 1);
    let report = second.prepare_one(&maize, &CancellationToken::new());
    assert_eq!(report.status, PrepareStatus::Completed);
    assert_eq!(second.runner().total(), 0);
    assert!(
        report
            .steps
            .iter()
            .all(|step| step.action == StepAction::Skipped)
    );
}

#[test]
fn failure_stops_only_its_record() {
    let (_temp, root) = temp_root();
    let store = Store::new(root.clone());
    let rice = record("Oryza", "sativa", "IRGSP-1.0");
    let maize = record("Zea", "mays", "AGPv4");
    seed_archives(&store, &rice);
    seed_archives(&store, &maize);

    let pipeline = pipeline(
        &root,
        CountingRunner::failing("Oryza_sativa-IRGSP-1.0", PipelineStep::ConvertAnnotation),
        2,
    );
    let reports = pipeline
        .prepare_all(&[rice.clone(), maize.clone()], &CancellationToken::new())
        .unwrap();

    assert_eq!(reports[0].key, "Oryza_sativa-IRGSP-1.0");
    assert_matches!(
        &reports[0].status,
        PrepareStatus::Failed {
            step: PipelineStep::ConvertAnnotation,
            exit_code: Some(2),
            message,
        } if message == "boom"
    );
    assert!(
        !pipeline
            .runner()
            .calls_for("Oryza_sativa-IRGSP-1.0")
            .contains(&PipelineStep::DeriveSpliceSites)
    );
    assert_eq!(reports[1].status, PrepareStatus::Completed);
    assert_eq!(pipeline.runner().calls_for("Zea_mays-AGPv4").len(), 5);
}

#[test]
fn missing_archive_fails_without_invocation() {
    let (_temp, root) = temp_root();
    let pipeline = pipeline(&root, CountingRunner::default(), 1);
    let report = pipeline.prepare_one(&record("Zea", "mays", "AGPv4"), &CancellationToken::new());
    assert_matches!(
        report.status,
        PrepareStatus::Failed {
            step: PipelineStep::Decompress,
            exit_code: None,
            ..
        }
    );
    assert_eq!(pipeline.runner().total(), 0);
}

#[test]
fn success_without_output_is_failure() {
    let (_temp, root) = temp_root();
    let store = Store::new(root.clone());
    let maize = record("Zea", "mays", "AGPv4");
    seed_archives(&store, &maize);
    let runner = CountingRunner {
        skip_output: true,
        ..CountingRunner::default()
    };
    let report = pipeline(&root, runner, 1).prepare_one(&maize, &CancellationToken::new());
    assert_matches!(
        report.status,
        PrepareStatus::Failed {
            step: PipelineStep::Decompress,
            exit_code: Some(0),
            ..
        }
    );
}

#[test]
fn cancelled_before_start() {
    let (_temp, root) = temp_root();
    let store = Store::new(root.clone());
    let maize = record("Zea", "mays", "AGPv4");
    seed_archives(&store, &maize);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let pipeline = pipeline(&root, CountingRunner::default(), 1);
    let reports = pipeline.prepare_all(&[maize], &cancel).unwrap();
    assert_eq!(reports[0].status, PrepareStatus::Cancelled);
    assert_eq!(pipeline.runner().total(), 0);
}

#[test]
fn failed_step_output_is_discarded_and_rerun() {
    let (_temp, root) = temp_root();
    let store = Store::new(root.clone());
    let maize = record("Zea", "mays", "AGPv4");
    seed_archives(&store, &maize);
    let files = store.assembly_files(&maize.identity());

    let runner = CountingRunner {
        partial_on_fail: true,
        ..CountingRunner::failing("Zea_mays-AGPv4", PipelineStep::ConvertAnnotation)
    };
    let report = pipeline(&root, runner, 1).prepare_one(&maize, &CancellationToken::new());
    assert_matches!(
        report.status,
        PrepareStatus::Failed {
            step: PipelineStep::ConvertAnnotation,
            ..
        }
    );
    assert!(!files.converted_annotation.exists());

    let retry = pipeline(&root, CountingRunner::default(), 1);
    let report = retry.prepare_one(&maize, &CancellationToken::new());
    assert_eq!(report.status, PrepareStatus::Completed);
    assert_eq!(
        action_of(&report, PipelineStep::BuildSequenceIndex),
        Some(StepAction::Skipped)
    );
    assert_eq!(
        action_of(&report, PipelineStep::ConvertAnnotation),
        Some(StepAction::Ran)
    );
    assert_eq!(
        retry.runner().calls_for("Zea_mays-AGPv4"),
        vec![
            PipelineStep::ConvertAnnotation,
            PipelineStep::DeriveSpliceSites,
        ]
    );
}

#[test]
fn failed_index_build_leaves_no_index_files() {
    let (_temp, root) = temp_root();
    let store = Store::new(root.clone());
    let maize = record("Zea", "mays", "AGPv4");
    seed_archives(&store, &maize);
    let files = store.assembly_files(&maize.identity());

    let runner = CountingRunner {
        partial_on_fail: true,
        ..CountingRunner::failing("Zea_mays-AGPv4", PipelineStep::BuildSequenceIndex)
    };
    let report = pipeline(&root, runner, 1).prepare_one(&maize, &CancellationToken::new());
    assert_matches!(
        report.status,
        PrepareStatus::Failed {
            step: PipelineStep::BuildSequenceIndex,
            exit_code: Some(2),
            ..
        }
    );
    let leftovers: Vec<String> = std::fs::read_dir(files.dir.as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".ht2"))
        .collect();
    assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    assert!(files.sequence.exists());

    let retry = pipeline(&root, CountingRunner::default(), 1);
    let report = retry.prepare_one(&maize, &CancellationToken::new());
    assert_eq!(report.status, PrepareStatus::Completed);
    assert_eq!(
        action_of(&report, PipelineStep::BuildSequenceIndex),
        Some(StepAction::Ran)
    );
}

#[test]
fn large_index_counts_as_built() {
    let (_temp, root) = temp_root();
    let store = Store::new(root.clone());
    let maize = record("Zea", "mays", "AGPv4");
    seed_archives(&store, &maize);
    let files = store.assembly_files(&maize.identity());
    let [small, large] = files.index_markers();

    let runner = CountingRunner {
        large_index: true,
        ..CountingRunner::default()
    };
    let report = pipeline(&root, runner, 1).prepare_one(&maize, &CancellationToken::new());
    assert_eq!(report.status, PrepareStatus::Completed);
    assert!(!small.exists());
    let index = report
        .steps
        .iter()
        .find(|record| record.step == PipelineStep::BuildSequenceIndex)
        .unwrap();
    assert_eq!(index.action, StepAction::Ran);
    assert_eq!(index.output, large.as_str());

    let second = pipeline(&root, CountingRunner::default(), 1);
    let report = second.prepare_one(&maize, &CancellationToken::new());
    assert_eq!(report.status, PrepareStatus::Completed);
    assert_eq!(
        action_of(&report, PipelineStep::BuildSequenceIndex),
        Some(StepAction::Skipped)
    );
    assert_eq!(second.runner().total(), 0);
}
