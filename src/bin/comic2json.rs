//! CLI binary for comic-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, prints the comic as JSON, or files it in a local
//! comic library.

use anyhow::{Context, Result};
use clap::Parser;
use comic_extract::{
    ComicLibrary, ExtractionConfig, ExtractionOutput, ExtractionPipeline,
    ExtractionProgressCallback, ExtractionStats, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages may finish out of
/// order when `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    fallbacks: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_extraction_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            fallbacks: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Reading");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, bubble_count: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{bubble_count:>3} bubbles")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_fallback(&self, page_num: usize, total: usize, reason: &str) {
        let secs = self.elapsed_secs(page_num);
        self.fallbacks.fetch_add(1, Ordering::SeqCst);

        let msg: String = if reason.chars().count() > 80 {
            let cut: String = reason.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            reason.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            yellow("↺"),
            page_num,
            total,
            yellow(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, fallback_count: usize) {
        self.bar.finish_and_clear();
        if fallback_count == 0 {
            eprintln!("{} {} pages read", green("✔"), bold(&total_pages.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages read  ({} fell back to narration)",
                yellow("⚠"),
                bold(&(total_pages - fallback_count).to_string()),
                total_pages,
                yellow(&fallback_count.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a comic to stdout
  comic2json issue-01.pdf

  # Write to a file with an explicit title
  comic2json issue-01.pdf --title "Night Market #1" -o issue-01.json

  # Four pages in flight, retries in the provider adapter
  comic2json -c 4 --max-retries 2 volume.pdf -o volume.json

  # File the comic in a local library instead of printing it
  comic2json issue-01.pdf --library ./library --owner alice

OUTPUT:
  {title, characters, reading_direction, style,
   pages: [{page_number, panels: [{panel_id, order,
     bubbles: [{bubble_id, text, order, character, bubble_type}]}]}]}

  A page the model could not read holds one narration bubble by "Narrator".

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (else ./ then the system library)
"#;

/// Extract panels, speech bubbles and characters from comic PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "comic2json",
    version,
    about = "Extract panels, speech bubbles and characters from comic PDFs",
    long_about = "Read a comic book PDF page by page with a Vision Language Model and emit \
its panels, bubbles, speakers, reading direction and art style as JSON. Supports OpenAI, \
Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Comic PDF to read.
    input: PathBuf,

    /// Comic title (default: the file name without extension).
    #[arg(long)]
    title: Option<String>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "COMIC2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pages analysed concurrently.
    #[arg(short, long, env = "COMIC2JSON_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "COMIC2JSON_PASSWORD")]
    password: Option<String>,

    /// Max model output tokens per page.
    #[arg(long, default_value_t = 2000)]
    page_max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.1)]
    temperature: f32,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "COMIC2JSON_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Provider retries per model call.
    #[arg(long, env = "COMIC2JSON_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Store the comic in a library rooted at this directory.
    #[arg(long, requires = "owner")]
    library: Option<PathBuf>,

    /// Owner id for `--library`.
    #[arg(long)]
    owner: Option<String>,

    /// Single-line JSON.
    #[arg(long)]
    compact: bool,

    /// Disable progress bar.
    #[arg(long, env = "COMIC2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let title = cli
        .title
        .clone()
        .unwrap_or_else(|| default_title(&cli.input));

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let pipeline = ExtractionPipeline::from_config(&config).context("Failed to set up the model")?;

    // ── Library mode ─────────────────────────────────────────────────────
    if let (Some(root), Some(owner)) = (&cli.library, &cli.owner) {
        let bytes = tokio::fs::read(&cli.input)
            .await
            .with_context(|| format!("Failed to read {}", cli.input.display()))?;
        let library = ComicLibrary::local(root, pipeline);
        let record = library
            .upload(&bytes, &title, owner)
            .await
            .context("Upload failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {}  {} pages  →  {}",
                green("✔"),
                bold(&record.title),
                record.metadata.pages.len(),
                dim(&record.id),
            );
        }
        println!("{}", record.id);
        return Ok(());
    }

    // ── Extraction ───────────────────────────────────────────────────────
    let output = pipeline
        .extract_with_stats(&cli.input, &title)
        .await
        .context("Extraction failed")?;

    let json = render_json(&output, cli.compact)?;
    if let Some(ref output_path) = cli.output {
        write_atomic(output_path, &json).await?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(json.as_bytes())
            .context("Failed to write to stdout")?;
        handle.write_all(b"\n").ok();
    }

    if !cli.quiet {
        print_summary(&output.stats, cli.output.as_deref());
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .concurrency(cli.concurrency)
        .page_max_tokens(cli.page_max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .max_retries(cli.max_retries);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn default_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}

fn render_json(output: &ExtractionOutput, compact: bool) -> Result<String> {
    let json = if compact {
        serde_json::to_string(&output.metadata)
    } else {
        serde_json::to_string_pretty(&output.metadata)
    };
    json.context("Failed to serialise comic")
}

/// Write via temp file + rename so a failed run never leaves half a file.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn print_summary(stats: &ExtractionStats, output_path: Option<&Path>) {
    let mark = if stats.fallback_pages == 0 {
        green("✔")
    } else {
        yellow("⚠")
    };
    let target = output_path
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {}/{} pages  {} characters  {}ms{}",
        mark,
        stats.analyzed_pages,
        stats.total_pages,
        stats.character_count,
        stats.total_duration_ms,
        target,
    );
    if !stats.style_classified {
        eprintln!("   {}", dim("style defaulted to ltr / western"));
    }
}
