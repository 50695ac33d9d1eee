use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CheckOptions;
use crate::descriptor::BridgeDescriptor;
use crate::probe::{ProbeOutcome, ReachabilityProbe, UnreachableReason};
use crate::verifier::{VerifierCapability, VerifyOutcome};

/// Terminal classification of one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalClass {
    Working,
    Dead,
    OpenButUnverified,
}

impl fmt::Display for FinalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalClass::Working => write!(f, "working"),
            FinalClass::Dead => write!(f, "dead"),
            FinalClass::OpenButUnverified => write!(f, "open, unverified"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub descriptor: Arc<BridgeDescriptor>,
    pub probe: ProbeOutcome,
    pub verify: Option<VerifyOutcome>,
    pub final_class: FinalClass,
}

impl CheckResult {
    pub fn new(
        descriptor: Arc<BridgeDescriptor>,
        probe: ProbeOutcome,
        verify: Option<VerifyOutcome>,
    ) -> Self {
        let final_class = classify(&probe, verify);
        Self {
            descriptor,
            probe,
            verify,
            final_class,
        }
    }
}

pub fn classify(probe: &ProbeOutcome, verify: Option<VerifyOutcome>) -> FinalClass {
    match (probe, verify) {
        (ProbeOutcome::Unreachable { .. }, _) => FinalClass::Dead,
        (ProbeOutcome::Reachable { .. }, None) => FinalClass::Working,
        (ProbeOutcome::Reachable { .. }, Some(VerifyOutcome::VerifiedOk)) => FinalClass::Working,
        (ProbeOutcome::Reachable { .. }, Some(VerifyOutcome::VerifiedFailed)) => FinalClass::Dead,
        (
            ProbeOutcome::Reachable { .. },
            Some(VerifyOutcome::VerifierUnavailable | VerifyOutcome::VerifierTimedOut),
        ) => FinalClass::OpenButUnverified,
    }
}

/// Counts checks currently running and the highest concurrent count seen
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub workers: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub peak_in_flight: usize,
    pub interrupted: bool,
}

/// Bounded worker pool running one check per descriptor
pub struct Scheduler {
    options: CheckOptions,
    prober: Arc<dyn ReachabilityProbe>,
    verifier: VerifierCapability,
    gauge: Arc<InFlightGauge>,
}

impl Scheduler {
    pub fn new(
        options: CheckOptions,
        prober: Arc<dyn ReachabilityProbe>,
        verifier: VerifierCapability,
    ) -> Self {
        Self {
            options,
            prober,
            verifier,
            gauge: Arc::new(InFlightGauge::default()),
        }
    }

    pub fn workers_for(&self, descriptors: usize) -> usize {
        self.options.concurrency_cap.max(1).min(descriptors)
    }

    pub fn gauge(&self) -> &InFlightGauge {
        &self.gauge
    }

    /// Dispatches every descriptor and sends each result as soon as it completes.
    ///
    /// Results arrive in completion order. Once `shutdown` fires no further
    /// descriptor is dispatched; checks already running are allowed to finish.
    pub async fn run(
        &self,
        descriptors: Vec<Arc<BridgeDescriptor>>,
        results: mpsc::UnboundedSender<CheckResult>,
        shutdown: &CancellationToken,
    ) -> RunStats {
        let workers = self.workers_for(descriptors.len());
        let mut stats = RunStats {
            workers,
            ..RunStats::default()
        };
        if workers == 0 {
            return stats;
        }

        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut queue = descriptors.into_iter();
        let mut next = queue.next();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled(), if next.is_some() => {
                    debug!(dispatched = stats.dispatched, "dispatch stopped by shutdown");
                    stats.interrupted = true;
                    next = None;
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok(result) => {
                        stats.completed += 1;
                        let _ = results.send(result);
                    }
                    Err(e) => warn!(error = %e, "check worker lost"),
                },
                permit = Arc::clone(&permits).acquire_owned(), if next.is_some() => {
                    let Ok(permit) = permit else { break };
                    let Some(descriptor) = next.take() else { continue };

                    let check = self.check_task(Arc::clone(&descriptor));
                    tasks.spawn(async move {
                        let _permit = permit;
                        // A panicking check still yields a result for its descriptor
                        match tokio::spawn(check).await {
                            Ok(result) => result,
                            Err(e) => failed_check(descriptor, e),
                        }
                    });
                    stats.dispatched += 1;
                    next = queue.next();
                }
                else => break,
            }
        }

        stats.peak_in_flight = self.gauge.peak();
        stats
    }

    /// Runs to completion and returns the results in completion order
    pub async fn collect(
        &self,
        descriptors: &[BridgeDescriptor],
        shutdown: &CancellationToken,
    ) -> (Vec<CheckResult>, RunStats) {
        let descriptors = descriptors.iter().cloned().map(Arc::new).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stats = self.run(descriptors, tx, shutdown).await;

        let mut results = Vec::with_capacity(stats.completed);
        while let Ok(result) = rx.try_recv() {
            results.push(result);
        }
        (results, stats)
    }

    fn check_task(
        &self,
        descriptor: Arc<BridgeDescriptor>,
    ) -> impl std::future::Future<Output = CheckResult> + Send + 'static {
        let options = self.options;
        let prober = Arc::clone(&self.prober);
        let verifier = self.verifier.clone();
        let gauge = Arc::clone(&self.gauge);

        async move {
            gauge.enter();
            let _in_flight = scopeguard::guard((), |_| gauge.leave());

            let probe = prober
                .probe(&descriptor.host, descriptor.port, options.probe_timeout)
                .await;

            let verify = if probe.is_reachable() && options.verify_enabled {
                Some(verifier.verify(&descriptor, options.verify_timeout).await)
            } else {
                None
            };

            CheckResult::new(descriptor, probe, verify)
        }
    }
}

fn failed_check(descriptor: Arc<BridgeDescriptor>, error: JoinError) -> CheckResult {
    warn!(bridge = %descriptor, error = %error, "check task failed");
    CheckResult::new(
        descriptor,
        ProbeOutcome::Unreachable {
            latency: Duration::ZERO,
            reason: UnreachableReason::OtherIo,
        },
        None,
    )
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod scheduler_tests;
