use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregator::{Aggregator, RunReport};
use crate::config::{CheckOptions, CheckerConfig};
use crate::descriptor::{parse_with_shape, InputShape, ParsedBridges};
use crate::error::{CheckerError, Result};
use crate::persist::{PersistOutcome, Persister};
use crate::probe::{ReachabilityProbe, TcpProbe};
use crate::report::{preview_lines, ReportEvent, ReportSink};
use crate::scheduler::Scheduler;
use crate::verifier::VerifierCapability;

/// Reads the bridge list. Any failure here aborts the run before probing.
pub fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| CheckerError::InputUnreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses the input, failing when no descriptor at all could be extracted
pub fn parse_input(text: &str, shape: InputShape, source_name: &str) -> Result<ParsedBridges> {
    let parsed = parse_with_shape(text, shape);
    if parsed.is_empty() {
        return Err(CheckerError::NoDescriptors {
            source_name: source_name.to_string(),
        });
    }
    Ok(parsed)
}

/// Parse, check, aggregate: one configured run
pub struct BridgeChecker {
    options: CheckOptions,
    prober: Arc<dyn ReachabilityProbe>,
    verifier: VerifierCapability,
    sink: Arc<dyn ReportSink>,
}

impl BridgeChecker {
    pub fn new(
        options: CheckOptions,
        verifier: VerifierCapability,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            options,
            prober: Arc::new(TcpProbe::new()),
            verifier,
            sink,
        }
    }

    pub fn with_prober(mut self, prober: Arc<dyn ReachabilityProbe>) -> Self {
        self.prober = prober;
        self
    }

    pub async fn check(&self, parsed: &ParsedBridges, shutdown: &CancellationToken) -> RunReport {
        self.sink.emit(ReportEvent::Parsed {
            descriptors: parsed.descriptors.len(),
            warnings: parsed.warnings.clone(),
        });

        let scheduler = Scheduler::new(
            self.options,
            Arc::clone(&self.prober),
            self.verifier.clone(),
        );
        let total = parsed.descriptors.len();
        self.sink.emit(ReportEvent::Started {
            total,
            workers: scheduler.workers_for(total),
            verify: self.options.verify_enabled,
            verifier_available: self.verifier.is_available(),
        });

        let descriptors = parsed.descriptors.iter().cloned().map(Arc::new).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut aggregator = Aggregator::new();

        let dispatch = scheduler.run(descriptors, tx, shutdown);
        let collect = async {
            while let Some(result) = rx.recv().await {
                aggregator.record(result.clone());
                self.sink.emit(ReportEvent::Checked {
                    completed: aggregator.len(),
                    total,
                    result,
                });
            }
        };
        let (stats, ()) = tokio::join!(dispatch, collect);

        info!(
            dispatched = stats.dispatched,
            completed = stats.completed,
            peak_in_flight = stats.peak_in_flight,
            "dispatch finished"
        );
        if stats.interrupted {
            self.sink.emit(ReportEvent::Interrupted {
                completed: aggregator.len(),
                total,
            });
        }

        let report = aggregator.finish(stats.interrupted);
        let (preview, remaining) = preview_lines(report.working_lines(true));
        self.sink.emit(ReportEvent::Finished {
            summary: report.summary.clone(),
            preview,
            remaining,
        });
        report
    }

    /// Writes the lists unless the run was interrupted
    pub fn persist(&self, report: &RunReport, persister: &Persister) -> Option<PersistOutcome> {
        if report.interrupted {
            return None;
        }
        let outcome = persister.persist(report);
        self.sink.emit(ReportEvent::Persisted(outcome.clone()));
        Some(outcome)
    }
}

/// Full run driven by a [`CheckerConfig`]: read, parse, check, persist.
///
/// Only an unreadable input or an input without any descriptor is an error.
pub async fn execute(
    config: &CheckerConfig,
    verifier: VerifierCapability,
    sink: Arc<dyn ReportSink>,
    shutdown: &CancellationToken,
) -> Result<RunReport> {
    let options = config.check_options()?;
    let text = read_input(&config.input)?;
    let parsed = parse_input(&text, config.shape, &config.input.display().to_string())?;

    let checker = BridgeChecker::new(options, verifier, sink);
    let report = checker.check(&parsed, shutdown).await;

    let persister = Persister::new(&config.working_output, &config.dead_output)
        .include_unverified(config.include_unverified_in_working);
    checker.persist(&report, &persister);

    Ok(report)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
