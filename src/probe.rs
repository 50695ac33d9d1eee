use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use socket2::SockRef;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::Instant;
use tracing::debug;

/// Default bound on a single connection attempt
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Why a bridge could not be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnreachableReason {
    ConnectionRefused,
    Timeout,
    DnsFailure,
    OtherIo,
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::ConnectionRefused => write!(f, "connection refused"),
            UnreachableReason::Timeout => write!(f, "timed out"),
            UnreachableReason::DnsFailure => write!(f, "name resolution failed"),
            UnreachableReason::OtherIo => write!(f, "I/O error"),
        }
    }
}

/// Result of one reachability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable {
        latency: Duration,
    },
    Unreachable {
        latency: Duration,
        reason: UnreachableReason,
    },
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable { .. })
    }

    pub fn latency(&self) -> Duration {
        match self {
            ProbeOutcome::Reachable { latency } | ProbeOutcome::Unreachable { latency, .. } => {
                *latency
            }
        }
    }

    pub fn reason(&self) -> Option<UnreachableReason> {
        match self {
            ProbeOutcome::Reachable { .. } => None,
            ProbeOutcome::Unreachable { reason, .. } => Some(*reason),
        }
    }
}

/// Cheap liveness gate run before any deeper check
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> ProbeOutcome;
}

/// Plain TCP connect probe
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl TcpProbe {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, UnreachableReason> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        lookup_host((host, port))
            .await
            .map_err(|_| UnreachableReason::DnsFailure)?
            .next()
            .ok_or(UnreachableReason::DnsFailure)
    }

    async fn connect(host: &str, port: u16) -> Result<(), UnreachableReason> {
        let addr = Self::resolve(host, port).await?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| classify_io_error(&e))?;

        // RST on close, no TIME_WAIT left behind per probe
        let _ = SockRef::from(&stream).set_linger(Some(Duration::ZERO));
        drop(stream);
        Ok(())
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
        let outcome = timed_attempt(timeout, Self::connect(host, port)).await;
        debug!(host, port, ?outcome, "probe finished");
        outcome
    }
}

/// Bounds one connection attempt by `timeout` and measures it
pub async fn timed_attempt<F>(timeout: Duration, attempt: F) -> ProbeOutcome
where
    F: Future<Output = Result<(), UnreachableReason>>,
{
    let started = Instant::now();
    let result = tokio::time::timeout(timeout, attempt).await;
    let latency = started.elapsed();

    match result {
        Ok(Ok(())) => ProbeOutcome::Reachable { latency },
        Ok(Err(reason)) => ProbeOutcome::Unreachable { latency, reason },
        Err(_) => ProbeOutcome::Unreachable {
            latency,
            reason: UnreachableReason::Timeout,
        },
    }
}

pub fn classify_io_error(error: &io::Error) -> UnreachableReason {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => UnreachableReason::ConnectionRefused,
        io::ErrorKind::TimedOut => UnreachableReason::Timeout,
        _ => UnreachableReason::OtherIo,
    }
}
