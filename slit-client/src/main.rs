use std::{io, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use libbpf_rs::ObjectBuilder;
use slit::{
    points::{exec::EXEC_PROGRAM, signal::SIGNAL_PROGRAM},
    probe::libbpf::{LoadedProbes, DEFAULT_PERF_PAGES},
    Observer, ObserverConfig, OutputFormat, Profile,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Container runtime telemetry", long_about = None)]
pub struct Args {
    /// Raise RLIMIT_MEMLOCK to infinity before loading probes
    #[arg(short, long, global = true, default_value_t = true, action = clap::ArgAction::Set)]
    rlimit_infinity: bool,

    /// Log everything down to debug level
    #[arg(short, long, global = true, default_value_t = true, action = clap::ArgAction::Set)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run with the default profile, and print JSON events
    #[command(visible_alias = "a")]
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
    /// Compiled BPF object holding trace_execve and trace_signal_deliver
    #[arg(short, long, default_value = "probe.bpf.o")]
    object: PathBuf,

    /// Perf event array written by trace_execve
    #[arg(long, default_value = "execve_events")]
    exec_map: String,

    /// Perf event array written by trace_signal_deliver
    #[arg(long, default_value = "signal_events")]
    signal_map: String,

    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Events buffered between the readers and stdout
    #[arg(long, default_value_t = ObserverConfig::default().channel_capacity)]
    channel_capacity: usize,

    /// Per-CPU perf buffer size in pages
    #[arg(long, default_value_t = DEFAULT_PERF_PAGES)]
    perf_pages: usize,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Format {
    Json,
    Summary,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Json => OutputFormat::Json,
            Format::Summary => OutputFormat::Summary,
        }
    }
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    log::set_max_level(level);
    env_logger::builder()
        .filter(None, level)
        .parse_default_env()
        .init();
    log::debug!("[Verbose Mode Enabled]");

    let res = match &args.command {
        Some(Command::Run(run_args)) => run(&args, run_args),
        None => {
            Args::command()
                .print_help()
                .context("failed to print help")
        }
    };
    if let Err(err) = res {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args, run_args: &RunArgs) -> Result<()> {
    global_checks(args)?;

    let obj = ObjectBuilder::default()
        .open_file(&run_args.object)
        .with_context(|| format!("failed to open {}", run_args.object.display()))?
        .load()
        .with_context(|| format!("failed to load {}", run_args.object.display()))?;
    let mut probes = LoadedProbes::new(obj)
        .route(EXEC_PROGRAM, run_args.exec_map.as_str())
        .route(SIGNAL_PROGRAM, run_args.signal_map.as_str())
        .perf_pages(run_args.perf_pages);

    let config = ObserverConfig {
        channel_capacity: run_args.channel_capacity,
    };
    let mut observer = Observer::with_config(Profile::default(), config);
    let report = observer.start(&mut probes)?;
    for source in &report.sources {
        log::debug!("Reading {} events from {}", source.kind, source.hook);
    }

    let observer = Arc::new(observer);
    ctrlc::set_handler({
        let observer = observer.clone();
        move || observer.stop()
    })
    .context("failed to install Ctrl-C handler")?;

    let written = observer.consume_as(io::stdout().lock(), run_args.format.into())?;
    log::info!("Wrote {written} events");
    Ok(())
}

/// Runtime constraints checked before anything touches the kernel.
fn global_checks(args: &Args) -> Result<()> {
    // Probes are attached at runtime, so privileged access is required.
    if !nix::unistd::geteuid().is_root() {
        bail!("Permission denied.");
    }

    if args.rlimit_infinity {
        set_rlimit_infinity().context("Error setting rlimit")?;
    } else {
        // Only worth disabling when testing or debugging.
        log::warn!("setrlimit() infinity has NOT been enabled. errors may occur.");
    }
    Ok(())
}

// Lift the memlock limit. See https://nakryiko.com/posts/bcc-to-libbpf-howto-guide/#locked-memory-limits
fn set_rlimit_infinity() -> Result<()> {
    let rlimit = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
        bail!("Failed to increase rlimit: {}", io::Error::last_os_error());
    }
    Ok(())
}
