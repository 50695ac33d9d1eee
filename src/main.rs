use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use bridge_check::config::CheckerConfig;
use bridge_check::descriptor::InputShape;
use bridge_check::logging::{self, LogLevel};
use bridge_check::pipeline::{self, parse_input, read_input};
use bridge_check::report::ConsoleSink;
use bridge_check::verifier::VerifierCapability;

/// Conventional exit status after SIGINT
const EXIT_INTERRUPTED: u8 = 130;

enum CliCommand {
    Check(CliArgs),
    Help,
}

#[derive(Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    input: Option<PathBuf>,
    working_output: Option<PathBuf>,
    dead_output: Option<PathBuf>,
    verify: Option<bool>,
    probe_timeout_secs: Option<f64>,
    verify_timeout_secs: Option<f64>,
    workers: Option<usize>,
    validator: Option<String>,
    shape: Option<InputShape>,
    parse_only: bool,
    quiet: bool,
    log_level: LogLevel,
}

impl CliArgs {
    fn apply(self, config: &mut CheckerConfig) {
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(path) = self.working_output {
            config.working_output = path;
        }
        if let Some(path) = self.dead_output {
            config.dead_output = path;
        }
        if let Some(verify) = self.verify {
            config.verify = verify;
        }
        if let Some(secs) = self.probe_timeout_secs {
            config.probe_timeout_secs = secs;
        }
        if let Some(secs) = self.verify_timeout_secs {
            config.verify_timeout_secs = secs;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(validator) = self.validator {
            config.validator = validator;
        }
        if let Some(shape) = self.shape {
            config.shape = shape;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let args = match parse_cli_args(std::env::args().skip(1))? {
        CliCommand::Check(args) => args,
        CliCommand::Help => {
            print_help();
            return Ok(ExitCode::SUCCESS);
        }
    };

    logging::init(args.log_level)
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))?;

    let mut config = match &args.config_path {
        Some(path) => CheckerConfig::from_path(path)?,
        None => CheckerConfig::default(),
    };
    let parse_only = args.parse_only;
    let quiet = args.quiet;
    args.apply(&mut config);

    if parse_only {
        return list_descriptors(&config);
    }

    let verifier = if config.verify {
        let capability = VerifierCapability::detect(&config.validator);
        if let VerifierCapability::Unavailable { reason } = &capability {
            warn!(%reason, "deep verification unavailable");
        }
        capability
    } else {
        VerifierCapability::Unavailable {
            reason: "verification disabled".to_string(),
        }
    };

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let sink = Arc::new(ConsoleSink::stdout(quiet));
    let report = pipeline::execute(&config, verifier, sink, &shutdown)
        .await
        .context("bridge check failed")?;

    if report.interrupted {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Parser-only mode: prints what would be checked
fn list_descriptors(config: &CheckerConfig) -> anyhow::Result<ExitCode> {
    let text = read_input(&config.input)?;
    let parsed = parse_input(&text, config.shape, &config.input.display().to_string())?;
    let shape = match parsed.shape {
        InputShape::EmbeddedConfig => "torrc",
        InputShape::LineList | InputShape::Auto => "bridge list",
    };

    for warning in &parsed.warnings {
        println!("! skipped {warning}");
    }
    for descriptor in &parsed.descriptors {
        println!("{:>4}  {descriptor}", descriptor.index + 1);
    }
    println!(
        "{} bridges, {} skipped lines ({shape} input)",
        parsed.descriptors.len(),
        parsed.warnings.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| anyhow!("expected value after {name}"))
        };

        match arg.as_str() {
            "-c" | "--config" => parsed.config_path = Some(value(&arg)?.into()),
            "-i" | "--input" => parsed.input = Some(value(&arg)?.into()),
            "-o" | "--output" => parsed.working_output = Some(value(&arg)?.into()),
            "-d" | "--dead" => parsed.dead_output = Some(value(&arg)?.into()),
            "--verify" => parsed.verify = Some(true),
            "--no-verify" => parsed.verify = Some(false),
            "--timeout" => parsed.probe_timeout_secs = Some(number(&arg, value(&arg)?)?),
            "--verify-timeout" => parsed.verify_timeout_secs = Some(number(&arg, value(&arg)?)?),
            "--workers" => parsed.workers = Some(number(&arg, value(&arg)?)?),
            "--validator" => parsed.validator = Some(value(&arg)?),
            "--shape" => {
                let raw = value(&arg)?;
                parsed.shape = Some(raw.parse().map_err(|e: String| anyhow!(e))?);
            }
            "--log-level" => {
                let raw = value(&arg)?;
                parsed.log_level = raw.parse().map_err(|e: String| anyhow!(e))?;
            }
            "--parse-only" => parsed.parse_only = true,
            "-q" | "--quiet" => parsed.quiet = true,
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Check(parsed))
}

fn number<T>(name: &str, raw: String) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .with_context(|| format!("invalid value `{raw}` for {name}"))
}

fn print_help() {
    println!(
        "\
Usage: bridge-check [OPTIONS]

Checks Tor bridge lines for TCP reachability and, optionally, validity.

Options:
  -c, --config <PATH>          TOML file with default settings
  -i, --input <PATH>           Bridge list or torrc to read [default: bridges.txt]
  -o, --output <PATH>          Working bridges output [default: actual_bridges.txt]
  -d, --dead <PATH>            Dead bridges output [default: dead_bridges.txt]
      --verify                 Validate open bridges with `tor --verify-config`
      --no-verify              Only probe TCP reachability, overriding the config file
      --timeout <SECS>         TCP connect timeout [default: 3]
      --verify-timeout <SECS>  Validator timeout [default: 15]
      --workers <N>            Maximum concurrent checks [default: 20]
      --validator <PROGRAM>    Validator program or path [default: tor]
      --shape <SHAPE>          Input shape: auto, lines or torrc [default: auto]
      --parse-only             List parsed bridges without probing
  -q, --quiet                  Only print the summary
      --log-level <LEVEL>      error, warn, info, debug or trace [default: warn]
  -h, --help                   Print help

Diagnostic logs go to stderr; RUST_LOG overrides --log-level."
    );
}
