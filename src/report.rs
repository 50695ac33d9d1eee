use std::io::Write;
use std::sync::Mutex;

use crate::aggregator::Summary;
use crate::descriptor::{truncate, ParseWarning};
use crate::persist::{ArtifactStatus, PersistOutcome};
use crate::scheduler::{CheckResult, FinalClass};

pub const PREVIEW_LINES: usize = 5;
const PREVIEW_CHARS: usize = 80;

/// Progress and outcome notifications emitted by a run
#[derive(Debug, Clone)]
pub enum ReportEvent {
    Parsed {
        descriptors: usize,
        warnings: Vec<ParseWarning>,
    },
    Started {
        total: usize,
        workers: usize,
        verify: bool,
        verifier_available: bool,
    },
    Checked {
        completed: usize,
        total: usize,
        result: CheckResult,
    },
    Interrupted {
        completed: usize,
        total: usize,
    },
    Finished {
        summary: Summary,
        preview: Vec<String>,
        remaining: usize,
    },
    Persisted(PersistOutcome),
}

/// Destination for run events. The pipeline itself never prints.
pub trait ReportSink: Send + Sync {
    fn emit(&self, event: ReportEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn emit(&self, _event: ReportEvent) {}
}

/// Keeps every event, for inspection after a run
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ReportEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ReportSink for MemorySink {
    fn emit(&self, event: ReportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Human-readable progress on a writer (stdout by default)
pub struct ConsoleSink<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
    quiet: bool,
}

impl ConsoleSink {
    pub fn stdout(quiet: bool) -> Self {
        Self::new(std::io::stdout(), quiet)
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W, quiet: bool) -> Self {
        Self {
            out: Mutex::new(out),
            quiet,
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn render(&self, out: &mut W, event: ReportEvent) -> std::io::Result<()> {
        match event {
            ReportEvent::Parsed {
                descriptors,
                warnings,
            } => {
                for warning in &warnings {
                    writeln!(out, "! skipped {warning}")?;
                }
                writeln!(out, "Read {descriptors} bridges")?;
            }
            ReportEvent::Started {
                total,
                workers,
                verify,
                verifier_available,
            } => {
                writeln!(out, "Checking {total} bridges with {workers} workers")?;
                if verify && !verifier_available {
                    writeln!(
                        out,
                        "! validator not installed, open ports will be reported as unverified"
                    )?;
                }
            }
            ReportEvent::Checked {
                completed,
                total,
                result,
            } => {
                if !self.quiet {
                    writeln!(out, "[{completed}/{total}] {}", describe(&result))?;
                }
            }
            ReportEvent::Interrupted { completed, total } => {
                writeln!(
                    out,
                    "Interrupted after {completed}/{total} bridges, lists not written"
                )?;
            }
            ReportEvent::Finished {
                summary,
                preview,
                remaining,
            } => {
                let total = summary.total;
                writeln!(out)?;
                writeln!(
                    out,
                    "Working:     {}/{} ({:.1}%)",
                    summary.working,
                    total,
                    summary.working_percent()
                )?;
                if summary.open_but_unverified > 0 {
                    writeln!(
                        out,
                        "Unverified:  {}/{} ({:.1}%)",
                        summary.open_but_unverified,
                        total,
                        summary.unverified_percent()
                    )?;
                }
                writeln!(
                    out,
                    "Dead:        {}/{} ({:.1}%)",
                    summary.dead,
                    total,
                    summary.dead_percent()
                )?;
                for (reason, count) in &summary.unreachable_by_reason {
                    writeln!(out, "  {reason}: {count}")?;
                }
                writeln!(out, "Total time:  {:.2} s", summary.elapsed.as_secs_f64())?;
                writeln!(
                    out,
                    "Per bridge:  {:.2} s wall, {:.2} s probe",
                    summary.average_wall_time().as_secs_f64(),
                    summary.average_probe_latency().as_secs_f64()
                )?;

                if !preview.is_empty() {
                    writeln!(out, "\nFirst working bridges:")?;
                    for (i, line) in preview.iter().enumerate() {
                        writeln!(out, "  {}. {line}", i + 1)?;
                    }
                    if remaining > 0 {
                        writeln!(out, "  ... and {remaining} more")?;
                    }
                }
            }
            ReportEvent::Persisted(outcome) => {
                for status in [&outcome.working, &outcome.dead] {
                    match status {
                        ArtifactStatus::Written { path, lines } => {
                            writeln!(out, "Saved {lines} bridges to {}", path.display())?
                        }
                        ArtifactStatus::SkippedEmpty { path } => writeln!(
                            out,
                            "! no working bridges, {} not created",
                            path.display()
                        )?,
                        ArtifactStatus::Failed(e) => writeln!(out, "! {e}")?,
                    }
                }
            }
        }
        out.flush()
    }
}

impl<W: Write + Send> ReportSink for ConsoleSink<W> {
    fn emit(&self, event: ReportEvent) {
        if let Ok(mut out) = self.out.lock() {
            let _ = self.render(&mut out, event);
        }
    }
}

fn describe(result: &CheckResult) -> String {
    let bridge = &result.descriptor;
    let latency = result.probe.latency().as_secs_f64();
    let detail = match (result.probe.reason(), result.verify) {
        (Some(reason), _) => format!("unreachable: {reason}"),
        (None, Some(verify)) => format!("port open, {verify}"),
        (None, None) => "port open".to_string(),
    };
    let mark = match result.final_class {
        FinalClass::Working => "ok  ",
        FinalClass::OpenButUnverified => "open",
        FinalClass::Dead => "dead",
    };
    format!("{mark} {bridge} {detail} ({latency:.2} s)")
}

/// First working lines for the summary, truncated for display
pub fn preview_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> (Vec<String>, usize) {
    let mut preview = Vec::new();
    let mut remaining = 0;
    for line in lines {
        if preview.len() < PREVIEW_LINES {
            preview.push(truncate(line, PREVIEW_CHARS));
        } else {
            remaining += 1;
        }
    }
    (preview, remaining)
}
