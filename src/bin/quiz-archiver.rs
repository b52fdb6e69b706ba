//! CLI binary for quiz-archiver.
//!
//! A thin shim over the library crate: maps flags to `ArchiverConfig`, runs
//! one operation and prints the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use quiz_archiver::{
    resolve_url, ArchiveWorkerClient, ArchiverConfig, DirectoryFileStore, Rehydrator,
    ReportOptions,
};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Start an archive job for attempts 11 and 12 (no backups)
  echo '{"attemptids":[11,12],"fetch_metadata":true}' > attempts.json
  quiz-archiver enqueue --worker-url http://worker:8080/archive \
      --wwwroot https://moodle.example.org --token $WSTOKEN \
      --course-id 4 --cm-id 120 --quiz-id 9 --attempts-task attempts.json

  # Print the request body instead of sending it
  quiz-archiver enqueue --dry-run --wwwroot https://moodle.example.org ...

  # Inline all images of a rendered attempt page
  quiz-archiver inline attempt.html -o attempt.standalone.html \
      --wwwroot https://moodle.example.org --dataroot /var/www/moodledata \
      --files-dir /srv/exported-files

  # Resolve a relative URL
  quiz-archiver resolve ../img/a.png https://moodle.example.org/mod/quiz/review.php

ENVIRONMENT VARIABLES:
  QUIZ_ARCHIVER_INTERNAL_HOST   Scheme and host used instead of the public one
                                when fetching images (e.g. http://moodle-app:8080)
  QUIZ_ARCHIVER_WWWROOT         Public web root
  QUIZ_ARCHIVER_WORKER_URL      Enqueue endpoint of the archive worker
  RUST_LOG                      Log filter, overrides -v / -q
"#;

/// Talk to the quiz archive worker and make report pages self-contained.
#[derive(Parser, Debug)]
#[command(
    name = "quiz-archiver",
    version,
    about = "Enqueue quiz archive jobs and inline report images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "QUIZ_ARCHIVER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "QUIZ_ARCHIVER_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send an enqueue request to the archive worker.
    Enqueue(EnqueueArgs),
    /// Replace the images of an HTML report with data URIs.
    Inline(InlineArgs),
    /// Resolve a relative URL against a base URL.
    Resolve {
        /// URL to resolve.
        url: String,
        /// Base URL (usually the page URL).
        base: String,
    },
}

#[derive(Args, Debug)]
struct EnqueueArgs {
    /// Enqueue endpoint of the archive worker.
    #[arg(long, env = "QUIZ_ARCHIVER_WORKER_URL")]
    worker_url: String,

    /// Public web root of the site.
    #[arg(long, env = "QUIZ_ARCHIVER_WWWROOT")]
    wwwroot: String,

    /// Web root the worker should use for callbacks instead of --wwwroot.
    #[arg(long, env = "QUIZ_ARCHIVER_INTERNAL_WWWROOT")]
    internal_wwwroot: Option<String>,

    /// Webservice token the worker authenticates with.
    #[arg(long, env = "QUIZ_ARCHIVER_WSTOKEN", hide_env_values = true)]
    token: String,

    #[arg(long)]
    course_id: i64,

    #[arg(long)]
    cm_id: i64,

    #[arg(long)]
    quiz_id: i64,

    /// JSON file with the attempt report task. Omit to skip the task.
    #[arg(long)]
    attempts_task: Option<PathBuf>,

    /// JSON file with the backup task. Omit to skip the task.
    #[arg(long)]
    backups_task: Option<PathBuf>,

    /// TCP connect timeout in seconds.
    #[arg(long, env = "QUIZ_ARCHIVER_CONNECT_TIMEOUT", default_value_t = 10)]
    connect_timeout: u64,

    /// Total request timeout in seconds.
    #[arg(long, env = "QUIZ_ARCHIVER_REQUEST_TIMEOUT", default_value_t = 60)]
    request_timeout: u64,

    /// Print the request body and exit without sending it.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct InlineArgs {
    /// HTML file to process, or "-" for stdin.
    input: String,

    /// Write the result to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Public web root of the site.
    #[arg(long, env = "QUIZ_ARCHIVER_WWWROOT")]
    wwwroot: String,

    /// Site data directory (STACK plots are read from <dataroot>/stack/plots).
    #[arg(long, env = "QUIZ_ARCHIVER_DATAROOT", default_value = "/var/www/moodledata")]
    dataroot: PathBuf,

    /// Directory laid out as <contextid>/<component>/<filearea>/<itemid><filepath><filename>
    /// serving pluginfile images.
    #[arg(long, env = "QUIZ_ARCHIVER_FILES_DIR")]
    files_dir: PathBuf,

    /// Internal scheme and host for image fetches.
    #[arg(long, env = "QUIZ_ARCHIVER_INTERNAL_HOST")]
    internal_host: Option<String>,

    /// Insert <base href="<wwwroot>/"> into the document head.
    #[arg(long)]
    base_href: bool,

    /// CSS file injected into the document head.
    #[arg(long)]
    css: Option<PathBuf>,

    /// Accept invalid TLS certificates for generic image downloads.
    #[arg(long, env = "QUIZ_ARCHIVER_INSECURE_IMAGE_FETCH")]
    insecure_image_fetch: bool,

    /// Per-image download timeout in seconds.
    #[arg(long, default_value_t = 30)]
    image_timeout: u64,

    /// Number of images fetched concurrently.
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Print per-image outcomes as JSON on stderr.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Enqueue(ref args) => run_enqueue(args, cli.quiet).await,
        Command::Inline(ref args) => run_inline(args, cli.quiet).await,
        Command::Resolve { ref url, ref base } => {
            println!("{}", resolve_url(url, base));
            Ok(())
        }
    }
}

async fn run_enqueue(args: &EnqueueArgs, quiet: bool) -> Result<()> {
    let mut builder = ArchiverConfig::builder()
        .wwwroot(&args.wwwroot)
        .worker_url(&args.worker_url)
        .connect_timeout_secs(args.connect_timeout)
        .request_timeout_secs(args.request_timeout);
    if let Some(ref root) = args.internal_wwwroot {
        builder = builder.internal_wwwroot(root);
    }
    let config = builder.build().context("Invalid configuration")?;
    let client = ArchiveWorkerClient::new(&config).context("Failed to create worker client")?;

    let attempts = read_task(args.attempts_task.as_deref()).await?;
    let backups = read_task(args.backups_task.as_deref()).await?;
    let request = client.build_request(
        &args.token,
        args.course_id,
        args.cm_id,
        args.quiz_id,
        attempts,
        backups,
    );

    if args.dry_run {
        println!(
            "{}",
            serde_json::to_string_pretty(&request).context("Failed to serialise request")?
        );
        return Ok(());
    }

    let response = client.send(&request).await.context("Enqueue failed")?;
    if !quiet {
        eprintln!(
            "{} job {} accepted ({})",
            green("✔"),
            bold(response.jobid().unwrap_or("?")),
            dim(response.status().unwrap_or("no status")),
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to serialise response")?
    );
    Ok(())
}

/// Load an optional task payload from a JSON file.
async fn read_task(path: Option<&Path>) -> Result<Option<Value>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read task file {:?}", path))?;
    let value = serde_json::from_str(&text)
        .with_context(|| format!("Task file {:?} is not valid JSON", path))?;
    Ok(Some(value))
}

async fn run_inline(args: &InlineArgs, quiet: bool) -> Result<()> {
    let mut builder = ArchiverConfig::from_env()
        .wwwroot(&args.wwwroot)
        .dataroot(&args.dataroot)
        .image_fetch_timeout_secs(args.image_timeout)
        .insecure_image_fetch(args.insecure_image_fetch)
        .concurrency(args.concurrency);
    if let Some(ref host) = args.internal_host {
        builder = builder.internal_host(host);
    }
    let config = builder.build().context("Invalid configuration")?;

    let files = Arc::new(DirectoryFileStore::new(&args.files_dir));
    let rehydrator = Rehydrator::new(config, files)
        .context("Failed to set up rehydrator")?;

    let html = read_input(&args.input).await?;
    let extra_css = match args.css {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read CSS from {:?}", path))?,
        ),
        None => None,
    };
    let options = ReportOptions {
        base_href: args.base_href,
        extra_css,
    };

    let doc = rehydrator.rehydrate(&html, &options).await;

    match args.output {
        Some(ref path) => tokio::fs::write(path, &doc.html)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?,
        None => io::stdout()
            .lock()
            .write_all(doc.html.as_bytes())
            .context("Failed to write to stdout")?,
    }

    if args.json {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&doc.images).context("Failed to serialise outcomes")?
        );
    } else if !quiet {
        for image in doc.images.iter().filter(|i| !i.is_inlined()) {
            if let Some(ref e) = image.error {
                eprintln!("  {} {}", red("✗"), dim(&e.to_string()));
            }
        }
        eprintln!(
            "{} {}/{} images inlined in {}ms",
            if doc.failed_count() == 0 { green("✔") } else { red("⚠") },
            doc.inlined_count(),
            doc.images.len(),
            doc.duration_ms
        );
    }
    Ok(())
}

async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {input}"))
}
