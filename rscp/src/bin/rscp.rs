use anyhow::{Context, anyhow};
use clap::Parser;
use tracing::instrument;

use rscp_tools_rscp::{TransferEngine, path};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rscp",
    version,
    about = "Copy files to and from remote hosts over the scp protocol, with an optional rate limit",
    long_about = "`rscp` copies single files between the local host and a remote host using the stock `scp` program on the remote side.

Exactly one side must be remote. Remote locations use `[user@]host[:port]:path` syntax; everything else is a local path. Several sources are copied one after another, the first failure stops the rest.

EXAMPLES:
    # Upload at most 1 MiB per second
    rscp --limit 1MiB ./backup.tar user@host:/srv/backups/

    # Download into the current directory
    rscp --progress host:/var/log/syslog .

    # List a remote directory
    rscp --ls host:/srv/backups"
)]
struct Args {
    // Connection
    /// Remote user name, used when a location does not name one
    #[arg(short = 'l', long, value_name = "USER", help_heading = "Connection")]
    user: Option<String>,

    /// Remote SSH port (default: taken from ssh configuration, usually 22)
    #[arg(short = 'P', long, value_name = "PORT", help_heading = "Connection")]
    port: Option<u16>,

    /// Private key file used to authenticate
    #[arg(short = 'i', long, value_name = "FILE", help_heading = "Connection")]
    identity: Option<std::path::PathBuf>,

    /// SSH connection timeout in seconds
    #[arg(
        long,
        default_value = "15",
        value_name = "N",
        help_heading = "Connection"
    )]
    connect_timeout_sec: u64,

    // Transfer
    /// Throughput limit in bytes per second (0 = unlimited)
    ///
    /// Accepts byte sizes like "512KiB", "10MB", or plain numbers in bytes.
    #[arg(
        long,
        default_value = "0",
        value_name = "BYTES_PER_SEC",
        help_heading = "Transfer"
    )]
    limit: bytesize::ByteSize,

    /// Size of the buffer used to move file data
    #[arg(
        long,
        default_value = "32KiB",
        value_name = "SIZE",
        help_heading = "Transfer"
    )]
    buffer_size: bytesize::ByteSize,

    /// List the contents of a remote directory (`ls -al`) instead of copying
    #[arg(long, help_heading = "Transfer")]
    ls: bool,

    // Progress & output
    /// Show a progress bar for each file
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Print the totals of the whole run at the end (a rate line for each file is printed
    /// unless --quiet is given)
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Source path(s) followed by the destination path; a single remote path with --ls
    #[arg(value_name = "PATHS")]
    paths: Vec<String>,
}

enum Outcome {
    Copied(rscp_tools_rscp::Summary),
    Listed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Copied(summary) => write!(f, "{summary}"),
            Outcome::Listed => write!(f, "listing complete"),
        }
    }
}

fn transfer_config(args: &Args) -> anyhow::Result<common::TransferConfig> {
    let config = common::TransferConfig {
        buffer_size: usize::try_from(args.buffer_size.0).context("--buffer-size is too large")?,
        progress: common::ProgressSettings {
            show_bar: args.progress,
            print_summary: !args.quiet,
        },
    };
    config.validate().map_err(|error| anyhow!(error))?;
    Ok(config)
}

#[instrument]
async fn async_main(args: Args) -> anyhow::Result<Outcome> {
    let config = transfer_config(&args)?;
    let credentials = std::sync::Arc::new(remote::CredentialContext::new(
        args.user.clone(),
        args.port,
        args.identity.clone(),
        Some(std::time::Duration::from_secs(args.connect_timeout_sec)),
    ));
    let engine = TransferEngine::new(remote::SshChannel::new(credentials), config);
    let outcome = if args.ls {
        let [location] = args.paths.as_slice() else {
            return Err(anyhow!("--ls takes exactly one remote location"));
        };
        let path::PathType::Remote(remote_path) = path::parse_path(location)? else {
            return Err(anyhow!("--ls needs a remote location, got {location:?}"));
        };
        engine
            .list(
                remote_path.session(),
                remote_path.path(),
                &mut tokio::io::stdout(),
            )
            .await
            .with_context(|| format!("failed listing {location}"))?;
        Outcome::Listed
    } else {
        let (destination, sources) = match args.paths.split_last() {
            Some((destination, sources)) => (destination.as_str(), sources),
            None => ("", &[][..]),
        };
        let specs =
            path::plan_transfers(sources, destination, args.user.as_deref(), args.limit.0)?;
        let summary = engine.run(&specs).await?;
        Outcome::Copied(summary)
    };
    tracing::info!("Program completed.");
    Ok(outcome)
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
