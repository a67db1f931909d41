//! Shared runtime pieces for the RSCP tools
//!
//! - [`progress`]: per-file byte accounting ([`ProgressTracker`]), the [`Observed`] stream
//!   wrapper that feeds it and the final [`Report`]
//! - [`config`]: plain configuration structs populated from the command line
//! - [`run`]: builds the tokio runtime, installs logging and reports the outcome of the
//!   tool's async main

pub mod config;
pub mod progress;

pub use config::{
    DEFAULT_BUFFER_SIZE, OutputConfig, ProgressSettings, RuntimeConfig, TransferConfig,
};
pub use progress::{Observed, ProgressTracker, Report};

fn verbosity_level(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Installs the global tracing subscriber, logs go to stderr.
///
/// `RUST_LOG` takes precedence over the verbosity level when set.
pub fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(verbosity_level(output.verbose).to_string())
    });
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(output.verbose > 1)
        .try_init()
    {
        eprintln!("Failed to initialize logging: {error}");
    }
}

fn build_runtime(runtime: &RuntimeConfig) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    Ok(builder.build()?)
}

/// Runs `func` to completion on a freshly built runtime.
///
/// Returns `None` when the runtime could not be created or `func` failed; the error is
/// printed to stderr unless running in quiet mode.
pub fn run<Summary, Fut>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(&output);
    let runtime = match build_runtime(&runtime) {
        Ok(runtime) => runtime,
        Err(error) => {
            if !output.quiet {
                eprintln!("Failed to start async runtime: {error:#}");
            }
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::debug!("run failed: {:?}", &error);
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
