//! Concurrent reachability and validity checker for Tor bridge lines.
//!
//! Bridge lines are parsed from a plain list or from a torrc-like config,
//! probed over TCP with a bounded worker pool, optionally validated by an
//! external `tor --verify-config`, and split into working and dead lists.

pub mod aggregator;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod persist;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod verifier;

pub use aggregator::{Aggregator, RunReport, Summary};
pub use config::{CheckOptions, CheckerConfig};
pub use descriptor::{parse, parse_with_shape, BridgeDescriptor, InputShape, ParsedBridges};
pub use error::{CheckerError, PersistError, Result};
pub use pipeline::{execute, BridgeChecker};
pub use probe::{ProbeOutcome, ReachabilityProbe, TcpProbe, UnreachableReason};
pub use report::{ConsoleSink, ReportEvent, ReportSink};
pub use scheduler::{CheckResult, FinalClass, Scheduler};
pub use verifier::{DescriptorVerifier, ExternalValidator, VerifierCapability, VerifyOutcome};
