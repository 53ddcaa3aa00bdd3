//! Job driver
//!
//! Entries run strictly in declaration order. An [`EntryError`] stays inside
//! the loop: it is logged, recorded in the [`JobReport`], and the next entry
//! runs. Only an empty output or a failed save ends the job with an error.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::assemble::ConcatenationAssembler;
use crate::encryption::EncryptionPolicy;
use crate::entry::{EntryProcessor, EntryReport};
use crate::error::{EntryError, Result};
use crate::job::{find_job_file, JobConfig};
use crate::pdf::DocumentEngine;

/// How one entry ended
#[derive(Debug)]
pub enum EntryOutcome {
    Processed(EntryReport),
    Skipped(EntryError),
}

/// One entry's source and outcome
#[derive(Debug)]
pub struct EntryStatus {
    pub source_path: PathBuf,
    pub outcome: EntryOutcome,
}

impl EntryStatus {
    pub fn pages_appended(&self) -> usize {
        match &self.outcome {
            EntryOutcome::Processed(report) => report.pages_appended,
            EntryOutcome::Skipped(_) => 0,
        }
    }
}

/// Summary of a saved job
#[derive(Debug)]
pub struct JobReport {
    pub output_path: PathBuf,
    pub page_count: usize,
    pub encrypted: bool,
    pub entries: Vec<EntryStatus>,
}

impl JobReport {
    pub fn skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, EntryOutcome::Skipped(_)))
            .count()
    }
}

/// Runs a validated job against a document engine
pub struct Orchestrator<'e, E: DocumentEngine> {
    engine: &'e E,
}

impl<'e, E: DocumentEngine> Orchestrator<'e, E> {
    pub fn new(engine: &'e E) -> Self {
        Self { engine }
    }

    /// Process every entry and save the output once
    #[instrument(skip_all, fields(entries = job.entries.len()))]
    pub fn run(&self, job: &JobConfig) -> Result<JobReport> {
        let mut assembler = ConcatenationAssembler::new(self.engine)?;
        let processor = EntryProcessor::new(self.engine);
        let mut entries = Vec::with_capacity(job.entries.len());

        for (index, entry) in job.entries.iter().enumerate() {
            for error in job.diagnostics_for(index) {
                warn!(entry = index + 1, source = %entry.source_path.display(), %error, "Watermark ignored");
            }

            let outcome = match processor.process(entry, &job.global_redact_keywords, &mut assembler) {
                Ok(report) => EntryOutcome::Processed(report),
                Err(error) => {
                    warn!(entry = index + 1, source = %entry.source_path.display(), %error, "Entry skipped");
                    EntryOutcome::Skipped(error)
                }
            };

            entries.push(EntryStatus {
                source_path: entry.source_path.clone(),
                outcome,
            });
        }

        let request = EncryptionPolicy::save_request(&job.output_path, job.encrypt_password.as_deref());
        let page_count = assembler.finalize(&request)?;

        info!(
            output = %job.output_path.display(),
            pages = page_count,
            encrypted = request.encryption.is_some(),
            "Job complete"
        );

        Ok(JobReport {
            output_path: job.output_path.clone(),
            page_count,
            encrypted: request.encryption.is_some(),
            entries,
        })
    }
}

/// Locate, load and run a job file (or a directory holding one).
///
/// `output` replaces the job's own output path when given.
pub fn run_job_file<E: DocumentEngine>(engine: &E, path: &Path, output: Option<&Path>) -> Result<JobReport> {
    let job_file = find_job_file(path)?;
    info!(job = %job_file.display(), "Loading job");

    let mut job = JobConfig::load(&job_file)?;
    if let Some(output) = output {
        job.output_path = output.to_path_buf();
    }

    Orchestrator::new(engine).run(&job)
}
