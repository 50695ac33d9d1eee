use super::*;

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::descriptor::parse;

const BASE_PORT: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Start(u16),
    End(u16),
}

/// Probe double: records start/end, sleeps, and fails or panics on request
#[derive(Default)]
struct ScriptedProbe {
    events: Mutex<Vec<Event>>,
    delay: Duration,
    unreachable: HashSet<u16>,
    panic_on: Option<u16>,
    cancel_on_first: Option<CancellationToken>,
}

impl ScriptedProbe {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn probe(&self, _host: &str, port: u16, _timeout: Duration) -> ProbeOutcome {
        self.events.lock().unwrap().push(Event::Start(port));
        if self.panic_on == Some(port) {
            panic!("probe exploded on port {port}");
        }
        if let Some(token) = &self.cancel_on_first {
            token.cancel();
        }

        tokio::time::sleep(self.delay).await;
        self.events.lock().unwrap().push(Event::End(port));

        if self.unreachable.contains(&port) {
            ProbeOutcome::Unreachable {
                latency: self.delay,
                reason: UnreachableReason::ConnectionRefused,
            }
        } else {
            ProbeOutcome::Reachable {
                latency: self.delay,
            }
        }
    }
}

struct CountingVerifier {
    calls: AtomicUsize,
    outcome: VerifyOutcome,
}

impl CountingVerifier {
    fn new(outcome: VerifyOutcome) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome,
        }
    }
}

#[async_trait]
impl crate::verifier::DescriptorVerifier for CountingVerifier {
    async fn verify(&self, _descriptor: &BridgeDescriptor, _timeout: Duration) -> VerifyOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
    }
}

fn descriptors(count: u16) -> Vec<BridgeDescriptor> {
    let text: String = (0..count)
        .map(|i| format!("obfs4 10.0.{}.{}:{} ABCDEF cert=XY iat-mode=0\n", i / 250, i % 250 + 1, BASE_PORT + i))
        .collect();
    let parsed = parse(&text);
    assert_eq!(parsed.descriptors.len(), count as usize);
    parsed.descriptors
}

fn scheduler(options: CheckOptions, probe: Arc<ScriptedProbe>, verifier: VerifierCapability) -> Scheduler {
    Scheduler::new(options, probe, verifier)
}

fn unavailable() -> VerifierCapability {
    VerifierCapability::Unavailable {
        reason: "not installed".to_string(),
    }
}

fn reachable() -> ProbeOutcome {
    ProbeOutcome::Reachable {
        latency: Duration::from_millis(5),
    }
}

#[test]
fn test_classification_table() {
    let dead = ProbeOutcome::Unreachable {
        latency: Duration::from_secs(3),
        reason: UnreachableReason::Timeout,
    };

    assert_eq!(classify(&dead, None), FinalClass::Dead);
    assert_eq!(classify(&dead, Some(VerifyOutcome::VerifiedOk)), FinalClass::Dead);
    assert_eq!(classify(&reachable(), None), FinalClass::Working);
    assert_eq!(classify(&reachable(), Some(VerifyOutcome::VerifiedOk)), FinalClass::Working);
    assert_eq!(classify(&reachable(), Some(VerifyOutcome::VerifiedFailed)), FinalClass::Dead);
    assert_eq!(
        classify(&reachable(), Some(VerifyOutcome::VerifierUnavailable)),
        FinalClass::OpenButUnverified
    );
    assert_eq!(
        classify(&reachable(), Some(VerifyOutcome::VerifierTimedOut)),
        FinalClass::OpenButUnverified
    );
}

#[tokio::test(start_paused = true)]
async fn test_pool_saturates_before_overflow_starts() {
    let probe = Arc::new(ScriptedProbe::with_delay(Duration::from_millis(50)));
    let sched = scheduler(CheckOptions::default(), Arc::clone(&probe), unavailable());

    let (results, stats) = sched.collect(&descriptors(25), &CancellationToken::new()).await;

    assert_eq!(results.len(), 25);
    assert_eq!(stats.workers, 20);
    assert_eq!(stats.peak_in_flight, 20);

    let events = probe.events();
    let first_end = events
        .iter()
        .position(|e| matches!(e, Event::End(_)))
        .unwrap();
    assert_eq!(first_end, 20);

    let first_wave: HashSet<u16> = events[..20]
        .iter()
        .map(|e| match e {
            Event::Start(port) => *port,
            Event::End(port) => panic!("unexpected end for {port}"),
        })
        .collect();
    let expected: HashSet<u16> = (BASE_PORT..BASE_PORT + 20).collect();
    assert_eq!(first_wave, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_never_exceeds_cap() {
    let probe = Arc::new(ScriptedProbe::with_delay(Duration::from_millis(20)));
    let options = CheckOptions::builder().concurrency_cap(3).build().unwrap();
    let sched = scheduler(options, probe, unavailable());

    let (results, stats) = sched.collect(&descriptors(12), &CancellationToken::new()).await;

    assert_eq!(results.len(), 12);
    assert_eq!(stats.workers, 3);
    assert!(stats.peak_in_flight >= 1 && stats.peak_in_flight <= 3);
    assert_eq!(sched.gauge().current(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_descriptor_yields_exactly_one_result() {
    let probe = Arc::new(ScriptedProbe {
        delay: Duration::from_millis(3),
        unreachable: [BASE_PORT + 1, BASE_PORT + 7, BASE_PORT + 30].into_iter().collect(),
        ..ScriptedProbe::default()
    });
    let options = CheckOptions::builder().concurrency_cap(8).build().unwrap();
    let sched = scheduler(options, probe, unavailable());

    let (results, stats) = sched.collect(&descriptors(40), &CancellationToken::new()).await;

    assert_eq!(stats.dispatched, 40);
    assert_eq!(stats.completed, 40);
    assert!(!stats.interrupted);

    let indices: HashSet<usize> = results.iter().map(|r| r.descriptor.index).collect();
    assert_eq!(indices.len(), 40);

    let dead = results
        .iter()
        .filter(|r| r.final_class == FinalClass::Dead)
        .count();
    assert_eq!(dead, 3);
}

#[tokio::test]
async fn test_verification_only_follows_reachable_probes() {
    let probe = Arc::new(ScriptedProbe {
        unreachable: [BASE_PORT, BASE_PORT + 2].into_iter().collect(),
        ..ScriptedProbe::default()
    });
    let verifier = Arc::new(CountingVerifier::new(VerifyOutcome::VerifiedFailed));
    let capability = VerifierCapability::Available(verifier.clone());
    let sched = scheduler(CheckOptions::deep_verification(), probe, capability);

    let (results, _) = sched.collect(&descriptors(5), &CancellationToken::new()).await;

    assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
    for result in &results {
        if result.probe.is_reachable() {
            assert_eq!(result.verify, Some(VerifyOutcome::VerifiedFailed));
        } else {
            assert_eq!(result.verify, None);
        }
        assert_eq!(result.final_class, FinalClass::Dead);
    }
}

#[tokio::test]
async fn test_disabled_verification_never_calls_verifier() {
    let verifier = Arc::new(CountingVerifier::new(VerifyOutcome::VerifiedFailed));
    let capability = VerifierCapability::Available(verifier.clone());
    let sched = scheduler(CheckOptions::default(), Arc::new(ScriptedProbe::default()), capability);

    let (results, _) = sched.collect(&descriptors(4), &CancellationToken::new()).await;

    assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    assert!(results.iter().all(|r| r.final_class == FinalClass::Working));
}

#[tokio::test]
async fn test_unavailable_verifier_is_never_dead() {
    let sched = scheduler(
        CheckOptions::deep_verification(),
        Arc::new(ScriptedProbe::default()),
        unavailable(),
    );

    let (results, _) = sched.collect(&descriptors(6), &CancellationToken::new()).await;

    assert_eq!(results.len(), 6);
    for result in results {
        assert_eq!(result.verify, Some(VerifyOutcome::VerifierUnavailable));
        assert_eq!(result.final_class, FinalClass::OpenButUnverified);
    }
}

#[tokio::test]
async fn test_panicking_check_is_recorded_as_dead() {
    let probe = Arc::new(ScriptedProbe {
        panic_on: Some(BASE_PORT + 1),
        ..ScriptedProbe::default()
    });
    let sched = scheduler(CheckOptions::default(), probe, unavailable());

    let (results, stats) = sched.collect(&descriptors(3), &CancellationToken::new()).await;

    assert_eq!(stats.completed, 3);
    let crashed = results
        .iter()
        .find(|r| r.descriptor.port == BASE_PORT + 1)
        .unwrap();
    assert_eq!(crashed.final_class, FinalClass::Dead);
    assert_eq!(crashed.probe.reason(), Some(UnreachableReason::OtherIo));
    assert_eq!(sched.gauge().current(), 0);
}

#[tokio::test]
async fn test_shutdown_stops_dispatch() {
    let shutdown = CancellationToken::new();
    let probe = Arc::new(ScriptedProbe {
        cancel_on_first: Some(shutdown.clone()),
        ..ScriptedProbe::default()
    });
    let options = CheckOptions::builder().concurrency_cap(1).build().unwrap();
    let sched = scheduler(options, probe, unavailable());

    let (results, stats) = sched.collect(&descriptors(5), &shutdown).await;

    assert!(stats.interrupted);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].descriptor.index, 0);
}

#[tokio::test]
async fn test_empty_batch() {
    let sched = scheduler(CheckOptions::default(), Arc::new(ScriptedProbe::default()), unavailable());

    let (results, stats) = sched.collect(&[], &CancellationToken::new()).await;

    assert!(results.is_empty());
    assert_eq!(stats, RunStats::default());
}
