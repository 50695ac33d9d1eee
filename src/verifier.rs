use std::env;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::descriptor::BridgeDescriptor;

/// Validator binary looked up on PATH when none is configured
pub const DEFAULT_VALIDATOR: &str = "tor";

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of handing one descriptor to the external validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    VerifiedOk,
    VerifiedFailed,
    VerifierUnavailable,
    VerifierTimedOut,
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyOutcome::VerifiedOk => write!(f, "verified"),
            VerifyOutcome::VerifiedFailed => write!(f, "rejected by validator"),
            VerifyOutcome::VerifierUnavailable => write!(f, "validator unavailable"),
            VerifyOutcome::VerifierTimedOut => write!(f, "validator timed out"),
        }
    }
}

#[async_trait]
pub trait DescriptorVerifier: Send + Sync {
    async fn verify(&self, descriptor: &BridgeDescriptor, timeout: Duration) -> VerifyOutcome;
}

/// Runs `<program> -f <config> --verify-config` against a single-bridge torrc
#[derive(Debug, Clone)]
pub struct ExternalValidator {
    program: PathBuf,
}

impl ExternalValidator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Minimal torrc that references only this bridge. Removed when the handle drops.
    fn write_config(descriptor: &BridgeDescriptor) -> io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("bridge-check-")
            .suffix(".torrc")
            .tempfile()?;
        write!(
            file,
            "SocksPort 0\nLog notice stdout\n{}\n",
            descriptor.bridge_directive()
        )?;
        file.flush()?;
        Ok(file)
    }
}

#[async_trait]
impl DescriptorVerifier for ExternalValidator {
    async fn verify(&self, descriptor: &BridgeDescriptor, timeout: Duration) -> VerifyOutcome {
        let config = match Self::write_config(descriptor) {
            Ok(config) => config,
            Err(e) => {
                warn!(bridge = %descriptor, error = %e, "cannot write validator config");
                return VerifyOutcome::VerifierUnavailable;
            }
        };

        let child = Command::new(&self.program)
            .arg("-f")
            .arg(config.path())
            .arg("--verify-config")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return VerifyOutcome::VerifierUnavailable;
            }
            Err(e) => {
                warn!(program = %self.program.display(), error = %e, "cannot start validator");
                return VerifyOutcome::VerifierUnavailable;
            }
        };

        // Dropping the output future on expiry kills the child
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(waited) => exit_outcome(descriptor, waited),
            Err(_) => VerifyOutcome::VerifierTimedOut,
        }
    }
}

/// Only an exit status judges the bridge; failing to collect one says nothing about it
fn exit_outcome(descriptor: &BridgeDescriptor, waited: io::Result<Output>) -> VerifyOutcome {
    match waited {
        Ok(output) if output.status.success() => VerifyOutcome::VerifiedOk,
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            debug!(
                bridge = %descriptor,
                status = %output.status,
                last_line = stdout.lines().last().unwrap_or(""),
                "validator rejected bridge"
            );
            VerifyOutcome::VerifiedFailed
        }
        Err(e) => {
            warn!(bridge = %descriptor, error = %e, "validator wait failed");
            VerifyOutcome::VerifierUnavailable
        }
    }
}

/// Deep verification resolved once at startup
#[derive(Clone)]
pub enum VerifierCapability {
    Available(Arc<dyn DescriptorVerifier>),
    Unavailable { reason: String },
}

impl VerifierCapability {
    /// Looks the validator up on PATH (or at an explicit path)
    pub fn detect(program: &str) -> Self {
        match locate_program(program) {
            Some(path) => {
                debug!(program = %path.display(), "validator found");
                VerifierCapability::Available(Arc::new(ExternalValidator::new(path)))
            }
            None => VerifierCapability::Unavailable {
                reason: format!("`{program}` not found"),
            },
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, VerifierCapability::Available(_))
    }

    pub async fn verify(&self, descriptor: &BridgeDescriptor, timeout: Duration) -> VerifyOutcome {
        match self {
            VerifierCapability::Available(verifier) => verifier.verify(descriptor, timeout).await,
            VerifierCapability::Unavailable { .. } => VerifyOutcome::VerifierUnavailable,
        }
    }
}

impl fmt::Debug for VerifierCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierCapability::Available(_) => write!(f, "Available"),
            VerifierCapability::Unavailable { reason } => {
                f.debug_struct("Unavailable").field("reason", reason).finish()
            }
        }
    }
}

fn locate_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let search_path = env::var_os("PATH")?;
    env::split_paths(&search_path)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{program}{}", env::consts::EXE_SUFFIX));
            [plain, exe]
        })
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse;

    fn bridge() -> BridgeDescriptor {
        parse("obfs4 198.51.100.5:443 ABCDEF0123 cert=XY iat-mode=0")
            .descriptors
            .remove(0)
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_validator_is_unavailable() {
        let capability = VerifierCapability::detect("bridge-check-no-such-validator");

        assert!(!capability.is_available());
        assert_eq!(
            capability.verify(&bridge(), Duration::from_secs(1)).await,
            VerifyOutcome::VerifierUnavailable
        );
    }

    #[tokio::test]
    async fn test_validator_vanishing_after_detection_is_unavailable() {
        let validator = ExternalValidator::new("/nonexistent/bridge-check/tor");
        assert_eq!(
            validator.verify(&bridge(), Duration::from_secs(1)).await,
            VerifyOutcome::VerifierUnavailable
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_maps_to_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let accept = script(dir.path(), "accept", "exit 0");
        let reject = script(dir.path(), "reject", "exit 1");

        let timeout = Duration::from_secs(10);
        assert_eq!(
            ExternalValidator::new(accept).verify(&bridge(), timeout).await,
            VerifyOutcome::VerifiedOk
        );
        assert_eq!(
            ExternalValidator::new(reject).verify(&bridge(), timeout).await,
            VerifyOutcome::VerifiedFailed
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_config_holds_single_bridge_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("seen");
        let body = format!(
            "echo \"$2\" > '{}'\ngrep -q '^Bridge obfs4 198.51.100.5:443' \"$2\" && grep -q '^SocksPort 0' \"$2\"",
            seen.display()
        );
        let validator = ExternalValidator::new(script(dir.path(), "inspect", &body));

        let outcome = validator.verify(&bridge(), Duration::from_secs(10)).await;
        assert_eq!(outcome, VerifyOutcome::VerifiedOk);

        let config_path = std::fs::read_to_string(&seen).unwrap();
        assert!(config_path.trim().ends_with(".torrc"));
        assert!(!Path::new(config_path.trim()).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_validator_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let validator = ExternalValidator::new(script(dir.path(), "slow", "sleep 30"));

        let started = std::time::Instant::now();
        let outcome = validator.verify(&bridge(), Duration::from_millis(200)).await;

        assert_eq!(outcome, VerifyOutcome::VerifierTimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_only_exit_status_decides_outcome() {
        use std::os::unix::process::ExitStatusExt;

        let output = |raw| Output {
            status: std::process::ExitStatus::from_raw(raw),
            stdout: b"[warn] Failed to parse bridge line\n".to_vec(),
            stderr: Vec::new(),
        };

        assert_eq!(exit_outcome(&bridge(), Ok(output(0))), VerifyOutcome::VerifiedOk);
        assert_eq!(exit_outcome(&bridge(), Ok(output(1 << 8))), VerifyOutcome::VerifiedFailed);
        assert_eq!(
            exit_outcome(&bridge(), Err(io::Error::other("pipe closed"))),
            VerifyOutcome::VerifierUnavailable
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_accepts_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "tor", "exit 0");

        assert!(VerifierCapability::detect(path.to_str().unwrap()).is_available());
    }
}
