/*!
 * cosxfer - command line front end for cos-transfer
 *
 * Credentials come from COS_SECRET_ID / COS_SECRET_KEY (and optionally
 * COS_SESSION_TOKEN). Ctrl-C pauses a running transfer; running the same
 * command again resumes it.
 */

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use cos_transfer::{
    config::LogLevel,
    error::{EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS},
    logging, ClientConfig, CosClient, CosError, CosResult, DownloadRequest,
    StaticCredentialProvider, TransferEvent, TransferEvents, TransferManager, TransferOutput,
    TransferState, UploadRequest,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cosxfer")]
#[command(version, about = "Resumable object-storage transfers", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Region, overrides the configuration file
    #[arg(short = 'r', long = "region", env = "COS_REGION", global = true)]
    region: Option<String>,

    /// Checkpoint file, overrides the configuration file
    #[arg(long = "checkpoint-file", value_name = "FILE", global = true)]
    checkpoint_file: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, default_value = "warn", global = true)]
    log_level: LogLevelArg,

    /// Log to this file as JSON lines
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Hide the progress bar
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download an object, resuming a previous partial download
    Download {
        bucket: String,
        key: String,
        /// Local destination file
        dest: PathBuf,

        /// First byte of the object to fetch
        #[arg(long = "range-start", default_value_t = 0)]
        range_start: u64,

        /// Last byte of the object to fetch (inclusive)
        #[arg(long = "range-end")]
        range_end: Option<u64>,

        /// Position in the destination file for the first fetched byte
        #[arg(long = "file-offset", default_value_t = 0)]
        file_offset: u64,
    },

    /// Upload a local file
    Upload {
        bucket: String,
        key: String,
        /// Local source file
        source: PathBuf,

        /// Content-Type of the object
        #[arg(long = "content-type")]
        content_type: Option<String>,

        /// Skip the Content-MD5 header
        #[arg(long = "no-md5")]
        no_md5: bool,
    },

    /// Show object metadata
    Head { bucket: String, key: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<CosError>()
                .map_or(EXIT_FATAL, CosError::exit_code)
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }
    if cli.checkpoint_file.is_some() {
        config.checkpoint_file = cli.checkpoint_file.clone();
    }
    config.logging.level = cli.log_level.into();
    config.logging.verbose = cli.verbose;
    if cli.log.is_some() {
        config.logging.file = cli.log.clone();
    }

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    if let Commands::Download { dest, .. } = &cli.command {
        if config.checkpoint_file.is_none() {
            config.checkpoint_file = Some(default_checkpoint_file(dest));
        }
    }

    let provider = Arc::new(
        StaticCredentialProvider::from_env().context("COS_SECRET_ID and COS_SECRET_KEY must be set")?,
    );
    let client = CosClient::with_reqwest(config, provider)?;

    match cli.command {
        Commands::Head { bucket, key } => {
            let meta = client.head_object(&bucket, &key).await?;
            println!("etag:           {}", meta.etag);
            println!("content-length: {}", meta.content_length);
            if let Some(content_type) = &meta.content_type {
                println!("content-type:   {}", content_type);
            }
            if let Some(modified) = meta.last_modified {
                println!("last-modified:  {}", modified.to_rfc2822());
            }
            Ok(EXIT_SUCCESS)
        }
        Commands::Download {
            bucket,
            key,
            dest,
            range_start,
            range_end,
            file_offset,
        } => {
            let manager = TransferManager::from_config(client).context("Failed to open checkpoint store")?;
            let request = DownloadRequest::new(bucket, key, dest)
                .range(range_start, range_end)
                .file_offset(file_offset);
            let (task, events) = manager.download(request)?;
            task.start();
            Ok(drive(&manager, events, cli.quiet).await?)
        }
        Commands::Upload {
            bucket,
            key,
            source,
            content_type,
            no_md5,
        } => {
            let manager = TransferManager::from_config(client)?;
            let mut request = UploadRequest::from_file(bucket, key, source).content_md5(!no_md5);
            if let Some(content_type) = content_type {
                request = request.content_type(content_type);
            }
            let (task, events) = manager.upload(request)?;
            task.start();
            Ok(drive(&manager, events, cli.quiet).await?)
        }
    }
}

/// Checkpoints for a download live next to its destination
fn default_checkpoint_file(dest: &Path) -> PathBuf {
    dest.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(".cosxfer-checkpoints.json")
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}

/// Render events until the transfer finishes or Ctrl-C pauses it
async fn drive(manager: &TransferManager, mut events: TransferEvents, quiet: bool) -> CosResult<i32> {
    let bar = progress_bar(quiet);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.pause_all();
                bar.abandon_with_message("paused");
                eprintln!("Paused; run the same command again to resume.");
                return Ok(EXIT_PARTIAL);
            }
            event = events.recv() => match event {
                Some(TransferEvent::Progress { completed, total }) => {
                    bar.set_length(total);
                    bar.set_position(completed);
                }
                Some(TransferEvent::StateChanged(state)) => {
                    tracing::debug!(%state, "transfer state");
                    if state == TransferState::Paused {
                        bar.abandon();
                        return Ok(EXIT_PARTIAL);
                    }
                }
                Some(TransferEvent::Succeeded(output)) => {
                    bar.finish();
                    report(&output);
                    return Ok(EXIT_SUCCESS);
                }
                Some(TransferEvent::Failed(err)) => {
                    bar.abandon();
                    return Err(err);
                }
                None => {
                    bar.abandon();
                    return Err(CosError::cancelled());
                }
            }
        }
    }
}

fn report(output: &TransferOutput) {
    match &output.local_path {
        Some(path) => println!(
            "{}/{} -> {} ({} bytes)",
            output.bucket,
            output.key,
            path.display(),
            output.total_bytes
        ),
        None => println!(
            "uploaded {}/{} ({} bytes, etag {})",
            output.bucket,
            output.key,
            output.total_bytes,
            output.etag.as_deref().unwrap_or("-")
        ),
    }
}
