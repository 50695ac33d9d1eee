use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::aggregator::RunReport;
use crate::error::PersistError;

/// What happened to one output artifact
#[derive(Debug, Clone)]
pub enum ArtifactStatus {
    Written { path: PathBuf, lines: usize },
    /// Nothing to write; the file was left untouched
    SkippedEmpty { path: PathBuf },
    Failed(Arc<PersistError>),
}

impl ArtifactStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ArtifactStatus::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub working: ArtifactStatus,
    pub dead: ArtifactStatus,
}

/// Writes the working and dead lists of a finished run
#[derive(Debug, Clone)]
pub struct Persister {
    working_path: PathBuf,
    dead_path: PathBuf,
    include_unverified: bool,
}

impl Persister {
    pub fn new(working_path: impl Into<PathBuf>, dead_path: impl Into<PathBuf>) -> Self {
        Self {
            working_path: working_path.into(),
            dead_path: dead_path.into(),
            include_unverified: true,
        }
    }

    /// Whether open-but-unverified bridges go to the working list
    pub fn include_unverified(mut self, include: bool) -> Self {
        self.include_unverified = include;
        self
    }

    pub fn persist(&self, report: &RunReport) -> PersistOutcome {
        let working_lines = report.working_lines(self.include_unverified);
        let working = if working_lines.is_empty() {
            warn!(path = %self.working_path.display(), "no working bridges, working list not written");
            ArtifactStatus::SkippedEmpty {
                path: self.working_path.clone(),
            }
        } else {
            write_artifact(&self.working_path, &working_lines)
        };

        let dead = write_artifact(&self.dead_path, &report.dead_lines());

        PersistOutcome { working, dead }
    }
}

fn write_artifact(path: &Path, lines: &[&str]) -> ArtifactStatus {
    match write_atomically(path, lines) {
        Ok(()) => {
            info!(path = %path.display(), lines = lines.len(), "bridge list written");
            ArtifactStatus::Written {
                path: path.to_path_buf(),
                lines: lines.len(),
            }
        }
        Err(e) => {
            warn!(error = %e, "bridge list not written");
            ArtifactStatus::Failed(Arc::new(e))
        }
    }
}

/// Writes to a sibling temp file and renames it over `path`, so readers never see a partial list
fn write_atomically(path: &Path, lines: &[&str]) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = tempfile::Builder::new()
        .prefix(".bridge-check-")
        .tempfile_in(dir)
        .map_err(|source| PersistError::Create {
            path: path.to_path_buf(),
            source,
        })?;

    let written = {
        let mut writer = BufWriter::new(staged.as_file_mut());
        lines
            .iter()
            .try_for_each(|line| writeln!(writer, "{line}"))
            .and_then(|()| writer.flush())
    };
    written
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    staged.persist(path).map_err(|e| PersistError::Replace {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
