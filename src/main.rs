#![forbid(unsafe_code)]

//! `ocr-supervisor` — command-line front-end for the OCR worker supervisor.
//!
//! Starts one supervised worker, runs the requested recognitions, prints one
//! JSON result per line on stdout, and shuts the worker down. Logs go to
//! stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ocr_supervisor::config::{language_config, OcrArgs, SupervisorConfig};
use ocr_supervisor::protocol::OcrResult;
use ocr_supervisor::{AppError, Result, Supervisor};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "ocr-supervisor", about = "Run OCR through a supervised worker process", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker executable; overrides `exe_path` from the config file.
    #[arg(long)]
    exe: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable direction classification.
    #[arg(long)]
    cls: Option<bool>,

    /// Enable MKL-DNN acceleration.
    #[arg(long)]
    enable_mkldnn: Option<bool>,

    /// Scale images down so their long side is at most this many pixels.
    #[arg(long)]
    limit_side_len: Option<i32>,

    /// Enable angle classification (must match `--cls`).
    #[arg(long)]
    use_angle_cls: Option<bool>,

    /// Model config file, relative to the worker directory.
    #[arg(long, conflicts_with = "lang")]
    config_path: Option<String>,

    /// Short language name (en, chinese, japan, …) selecting a bundled model config.
    #[arg(long)]
    lang: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recognize one or more image files.
    File {
        /// Image paths; requests are issued concurrently.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Recognize the image currently on the clipboard.
    Clipboard,
    /// Read image paths from stdin, one per line, until EOF or Ctrl-C.
    Stdin,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = build_config(&args)?;
    info!(exe = %config.exe_path.display(), args = %config.ocr.cmd_string(), "starting worker");

    let supervisor = Arc::new(Supervisor::start(&config).await?);

    let outcome = match args.command {
        Command::File { paths } => run_files(&supervisor, paths).await,
        Command::Clipboard => {
            let result = supervisor.ocr_clipboard().await;
            print_result("clipboard", result).await
        }
        Command::Stdin => run_stdin(&supervisor).await,
    };

    if let Err(err) = supervisor.shutdown().await {
        error!(%err, "worker shutdown failed");
    }
    outcome
}

/// Merge the config file (if any) with command-line overrides.
fn build_config(args: &Cli) -> Result<SupervisorConfig> {
    let mut config = match (&args.config, &args.exe) {
        (Some(path), _) => SupervisorConfig::load_from_path(path)?,
        (None, Some(exe)) => SupervisorConfig::new(exe, OcrArgs::default()),
        (None, None) => {
            return Err(AppError::Config(
                "either --config or --exe must be given".into(),
            ))
        }
    };

    if let Some(exe) = &args.exe {
        config.exe_path.clone_from(exe);
    }

    let ocr = &mut config.ocr;
    ocr.cls = args.cls.or(ocr.cls);
    ocr.enable_mkldnn = args.enable_mkldnn.or(ocr.enable_mkldnn);
    ocr.limit_side_len = args.limit_side_len.or(ocr.limit_side_len);
    ocr.use_angle_cls = args.use_angle_cls.or(ocr.use_angle_cls);
    if let Some(path) = &args.config_path {
        ocr.config_path = Some(path.clone());
    }
    if let Some(lang) = &args.lang {
        let path = language_config(lang)
            .ok_or_else(|| AppError::Config(format!("unknown language: {lang}")))?;
        ocr.config_path = Some(path.to_owned());
    }

    config.validate()?;
    Ok(config)
}

async fn run_files(supervisor: &Arc<Supervisor>, paths: Vec<PathBuf>) -> Result<()> {
    let requests = paths.into_iter().map(|path| {
        let supervisor = Arc::clone(supervisor);
        async move {
            let result = supervisor.ocr_file(&path).await;
            (path, result)
        }
    });

    let mut printed = Vec::new();
    for (path, result) in join_all(requests).await {
        printed.push(print_result(&path.display().to_string(), result).await);
    }
    first_failure(printed)
}

/// Keep the first failure of a batch, with its own error kind.
fn first_failure(outcomes: Vec<Result<()>>) -> Result<()> {
    let total = outcomes.len();
    let mut errors = outcomes.into_iter().filter_map(std::result::Result::err);
    let Some(first) = errors.next() else {
        return Ok(());
    };
    let failed = 1 + errors.count();
    error!(failed, total, "some requests failed");
    Err(first)
}

async fn run_stdin(supervisor: &Supervisor) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else { break };
        let path = line.trim();
        if path.is_empty() {
            continue;
        }

        // Keep going on per-image failures; the worker may recover on restart.
        let result = supervisor.ocr_file(path).await;
        print_result(path, result).await.ok();
    }

    Ok(())
}

/// Print a result as one JSON line on stdout; log and return failures.
async fn print_result(source: &str, result: Result<OcrResult>) -> Result<()> {
    match result {
        Ok(ocr) => {
            if !ocr.is_success() {
                warn!(source, code = ocr.code, message = %ocr.message, "worker reported no result");
            }
            let mut line = serde_json::to_vec(&serde_json::json!({
                "source": source,
                "code": ocr.code,
                "message": ocr.message,
                "items": ocr.items,
            }))?;
            line.push(b'\n');
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&line).await?;
            stdout.flush().await?;
            Ok(())
        }
        Err(err) => {
            error!(source, %err, "recognition failed");
            Err(err)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    tracing::error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
