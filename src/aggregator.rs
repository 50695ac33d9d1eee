use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::probe::UnreachableReason;
use crate::scheduler::{CheckResult, FinalClass};

/// Counters and timings for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub working: usize,
    pub dead: usize,
    pub open_but_unverified: usize,
    pub elapsed: Duration,
    pub probe_latency_total: Duration,
    pub unreachable_by_reason: BTreeMap<UnreachableReason, usize>,
}

impl Summary {
    pub fn working_percent(&self) -> f64 {
        percent(self.working, self.total)
    }

    pub fn dead_percent(&self) -> f64 {
        percent(self.dead, self.total)
    }

    pub fn unverified_percent(&self) -> f64 {
        percent(self.open_but_unverified, self.total)
    }

    pub fn average_probe_latency(&self) -> Duration {
        average(self.probe_latency_total, self.total)
    }

    /// Wall time divided by checked bridges
    pub fn average_wall_time(&self) -> Duration {
        average(self.elapsed, self.total)
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn average(sum: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => sum / count,
        Err(_) => Duration::from_secs_f64(sum.as_secs_f64() / count as f64),
    }
}

/// Collects results as they complete and restores input order at the end
#[derive(Debug)]
pub struct Aggregator {
    started: Instant,
    results: Vec<CheckResult>,
    summary: Summary,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            results: Vec::new(),
            summary: Summary::default(),
        }
    }

    pub fn record(&mut self, result: CheckResult) {
        let summary = &mut self.summary;
        summary.total += 1;
        summary.probe_latency_total += result.probe.latency();

        match result.final_class {
            FinalClass::Working => summary.working += 1,
            FinalClass::Dead => summary.dead += 1,
            FinalClass::OpenButUnverified => summary.open_but_unverified += 1,
        }
        if let Some(reason) = result.probe.reason() {
            *summary.unreachable_by_reason.entry(reason).or_insert(0) += 1;
        }

        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn finish(mut self, interrupted: bool) -> RunReport {
        self.summary.elapsed = self.started.elapsed();
        self.results.sort_by_key(|r| r.descriptor.index);
        RunReport {
            results: self.results,
            summary: self.summary,
            interrupted,
        }
    }
}

/// Ordered results of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<CheckResult>,
    pub summary: Summary,
    pub interrupted: bool,
}

impl RunReport {
    pub fn lines_where<'a>(
        &'a self,
        keep: impl Fn(FinalClass) -> bool + 'a,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.results
            .iter()
            .filter(move |r| keep(r.final_class))
            .map(|r| r.descriptor.raw_line.as_str())
    }

    pub fn working_lines(&self, include_unverified: bool) -> Vec<&str> {
        self.lines_where(move |class| {
            class == FinalClass::Working
                || (include_unverified && class == FinalClass::OpenButUnverified)
        })
        .collect()
    }

    pub fn dead_lines(&self) -> Vec<&str> {
        self.lines_where(|class| class == FinalClass::Dead).collect()
    }
}
