//! Sandbox child binary for single-job handler execution.
//!
//! Spawned by the parent supervisor with stdin/stdout wired to the
//! line-delimited JSON protocol. Diagnostics go to stderr (the parent
//! owns stderr redirection); stdout carries protocol frames only.
//!
//! Exits 0 on normal completion — including handler failures, which are
//! reported in-band — and non-zero only for fatal bootstrap failures.

use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use jobbox::RuntimeOptions;
use tracing_subscriber::EnvFilter;

/// Sandbox child process — runs one job handler in an isolated bundle
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "jobbox child process - executes a single sandboxed job handler"
)]
struct ChildArgs {
    /// Host filesystem prefix for the path remap rule.
    ///
    /// Absolute paths outside the bundle are reinterpreted relative to
    /// this prefix and re-validated before use.
    #[arg(long, env = "JOBBOX_HOST_ROOT_PREFIX")]
    host_root_prefix: Option<PathBuf>,
}

/// Initialize tracing on stderr.
///
/// stdout is the protocol channel and must stay clean; the env filter
/// defaults to "info" when RUST_LOG is not set.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = ChildArgs::parse();
    init_logging();

    let options = RuntimeOptions {
        host_root: args.host_root_prefix,
    };

    // Single-threaded cooperative scheduler; the only extra OS thread is
    // the blocking stdin reader spawned by the runtime.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(jobbox::run(
        BufReader::new(std::io::stdin()),
        std::io::stdout(),
        options,
    ));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Sandbox child exiting after fatal error");
            ExitCode::FAILURE
        }
    }
}
