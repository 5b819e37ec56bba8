// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use globtail::channel::{self, ChannelReceiver};
use globtail::init::args::{GlobTailArgs, TailArgs, WatchGlobArgs};
use globtail::init::output::{ChunkPrinter, format_glob_event};
use globtail::init::wait::{self, BoxError};
use globtail::tail::{
    ChannelConsumer, FileTailer, GlobScanner, GlobTail, LogHooks, StartAt, TailEvent,
    create_watcher,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Follow files, writing new data to stdout
    Tail(TailArgs),

    /// Discover files matching glob patterns and follow each of them
    GlobTail(GlobTailArgs),

    /// Report files as they start or stop matching glob patterns
    WatchGlob(WatchGlobArgs),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "globtail")]
#[command(bin_name = "globtail")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "GLOBTAIL_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version())
        }
        Some(command) => {
            let _guard = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run(command) {
                error!(error = e, "Failed to run.");
                return ExitCode::from(1);
            }
        }
        None => {
            // it shouldn't be possible to get here since we mark a subcommand as
            // required
            eprintln!("Must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run(command: Commands) -> Result<(), BoxError> {
    let mut join_set = JoinSet::new();
    let cancel_token = CancellationToken::new();

    match command {
        Commands::Tail(args) => {
            join_set.spawn(tail_files(args, cancel_token.clone()));
        }
        Commands::GlobTail(args) => {
            join_set.spawn(glob_tail(args, cancel_token.clone()));
        }
        Commands::WatchGlob(args) => {
            join_set.spawn(watch_glob(args, cancel_token.clone()));
        }
        Commands::Version => return Ok(()),
    }

    select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
        },
        e = wait::wait_for_any_task(&mut join_set) => {
            e?;
        },
    }

    cancel_token.cancel();
    wait::wait_for_tasks_with_timeout(&mut join_set, SHUTDOWN_TIMEOUT).await
}

async fn tail_files(args: TailArgs, cancel: CancellationToken) -> Result<(), BoxError> {
    let watcher = create_watcher(&args.tuning.watcher_config())?;
    let config = args.tuning.tail_config();
    let start = StartAt::from(args.start_at).into();

    let (tx, rx) = channel::unbounded();
    let mut tailers = Vec::with_capacity(args.paths.len());
    for path in &args.paths {
        match FileTailer::start(
            path,
            start,
            ChannelConsumer::from_sender(tx.clone()),
            &config,
            watcher.clone(),
        ) {
            Ok(tailer) => tailers.push(tailer),
            Err(e) => error!(path = ?path, "Unable to tail file: {}", e),
        }
    }
    drop(tx);

    if tailers.is_empty() {
        return Err("no files could be tailed".into());
    }

    let result = print_chunks(rx, args.paths.len() > 1, &cancel).await;

    for tailer in &tailers {
        tailer.close();
    }
    for tailer in tailers {
        tailer.join().await;
    }
    result
}

async fn glob_tail(args: GlobTailArgs, cancel: CancellationToken) -> Result<(), BoxError> {
    let (tx, rx) = channel::unbounded();
    let glob_tail = GlobTail::start(
        &args.to_config(),
        move |_: &Path| ChannelConsumer::from_sender(tx.clone()),
        LogHooks,
    )?;

    let result = print_chunks(rx, true, &cancel).await;

    glob_tail.shutdown();
    glob_tail.join().await;
    result
}

async fn watch_glob(args: WatchGlobArgs, cancel: CancellationToken) -> Result<(), BoxError> {
    let (tx, mut rx) = channel::unbounded();
    let mut scanners = Vec::with_capacity(args.patterns.len());
    for pattern in &args.patterns {
        scanners.push(GlobScanner::start(
            pattern.clone(),
            args.scan_interval(),
            tx.clone(),
        )?);
    }
    drop(tx);

    let mut stdout = tokio::io::stdout();
    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.next() => match event {
                Some(event) => {
                    let line = format!("{}\n", format_glob_event(&event));
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.flush().await?;
                }
                None => {
                    warn!("All glob scanners exited.");
                    break;
                }
            },
        }
    }

    for scanner in &scanners {
        scanner.stop();
    }
    for scanner in scanners {
        scanner.join().await;
    }
    Ok(())
}

async fn print_chunks(
    mut rx: ChannelReceiver<TailEvent>,
    headers: bool,
    cancel: &CancellationToken,
) -> Result<(), BoxError> {
    let mut printer = ChunkPrinter::new(tokio::io::stdout(), headers);
    loop {
        select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            event = rx.next() => match event {
                Some(event) => printer.write_event(&event).await?,
                None => return Ok(()),
            },
        }
    }
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init().expect("Unable to setup log tracer!");

    // Tailed data goes to stdout, so logs go to stderr.
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("notify=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

async fn signal_wait() {
    let mut sig_term = sig(SignalKind::terminate());
    let mut sig_int = sig(SignalKind::interrupt());

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

fn sig(kind: SignalKind) -> tokio::signal::unix::Signal {
    signal(kind).unwrap()
}
