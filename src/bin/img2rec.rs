//! CLI binary for img2rec.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `IngestConfig`, drives the stores, and prints results.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use img2rec::store::{self, SqliteRecordStore, SqliteSchemaStore};
use img2rec::{
    export::export_receipts_csv, ingest, storage, BatchRequest, FieldDef, IngestConfig,
    IngestProgressCallback, ProgressCallback, UploadedImage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per file.
struct CliProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl IngestProgressCallback for CliProgress {
    fn on_batch_start(&self, total_files: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>2}/{len} files  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.set_length(total_files as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Ingesting");
    }

    fn on_file_start(&self, _file_num: usize, _total: usize, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn on_file_complete(&self, file_num: usize, total: usize, field_count: usize) {
        self.bar.println(format!(
            "  {} File {:>2}/{:<2}  {}",
            green("✓"),
            file_num,
            total,
            dim(&format!("{field_count} fields")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, file_num: usize, total: usize, error: String) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            let truncated: String = error.chars().take(79).collect();
            format!("{truncated}\u{2026}")
        } else {
            error
        };

        self.bar.println(format!(
            "  {} File {:>2}/{:<2}  {}",
            red("✗"),
            file_num,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, persisted_count: usize) {
        let failed = total_files.saturating_sub(persisted_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} files persisted",
                green("✔"),
                bold(&persisted_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files persisted  ({} failed)",
                if failed == total_files {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&persisted_count.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One-time setup
  img2rec init
  img2rec employees add "Dana"
  img2rec types add --name Fuel --field "total:total amount:required" --field litres

  # Ingest a batch for employee 1, all receipt types eligible
  img2rec ingest receipts/*.jpg --employee 1

  # Restrict the candidate types and emit machine-readable results
  img2rec ingest lunch.jpg --employee 1 --types 2,3 --json

  # Inspect and export
  img2rec records --limit 20
  img2rec export -o receipts.csv

ENVIRONMENT VARIABLES:
  GOOGLE_VISION_API_KEY   Vision text-detection API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  IMG2REC_DB              Database file (default: receipts.sqlite)

SETUP:
  1. Set API keys:  export GOOGLE_VISION_API_KEY=...  OPENAI_API_KEY=sk-...
  2. Ingest:        img2rec ingest scan.jpg --employee 1
"#;

/// Digitise receipt and business-card images into structured records.
#[derive(Parser, Debug)]
#[command(
    name = "img2rec",
    version,
    about = "Digitise receipt and business-card images into structured records",
    long_about = "Digitise receipt and business-card images: extract the text with a Vision \
OCR call, map it onto your receipt-type schemas with an LLM, and persist the structured \
records to SQLite for listing and CSV export.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// SQLite database file.
    #[arg(long, global = true, env = "IMG2REC_DB", default_value = "receipts.sqlite")]
    db: String,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "IMG2REC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "IMG2REC_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database file and tables.
    Init,

    /// Process a batch of images into receipts.
    Ingest(IngestArgs),

    /// Manage receipt types (the extraction schemas).
    Types {
        #[command(subcommand)]
        action: TypesAction,
    },

    /// Manage employees.
    Employees {
        #[command(subcommand)]
        action: EmployeesAction,
    },

    /// List persisted receipts, newest first.
    Records {
        /// Show at most this many receipts.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Export receipts as CSV.
    Export {
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export only these receipt ids (comma-separated). Default: all.
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<i64>>,
    },

    /// List stored images, newest first.
    Images {
        /// Directory the originals were stored in.
        #[arg(long, env = "IMG2REC_UPLOAD_DIR", default_value = "uploads")]
        upload_dir: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct IngestArgs {
    /// Image files to process.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Employee id the receipts are attributed to.
    #[arg(short, long)]
    employee: i64,

    /// Candidate receipt type ids (comma-separated). Default: all types.
    #[arg(long, value_delimiter = ',')]
    types: Option<Vec<i64>>,

    /// Directory to store the original images in.
    #[arg(long, env = "IMG2REC_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// OCR language hint.
    #[arg(long, env = "IMG2REC_LANGUAGE", default_value = "en")]
    language: String,

    /// Max LLM output tokens per file.
    #[arg(long, env = "IMG2REC_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Retries per external call on transient failure.
    #[arg(long, env = "IMG2REC_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-call timeout in seconds for OCR and extraction. Unbounded if unset.
    #[arg(long, env = "IMG2REC_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// Output structured JSON (BatchOutput) instead of the summary.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "IMG2REC_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum TypesAction {
    /// List receipt types with their fields.
    List,

    /// Show one receipt type.
    Show { id: i64 },

    /// Create a receipt type.
    Add {
        #[arg(long)]
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Field spec "name[:description[:required]]"; repeatable.
        #[arg(long = "field")]
        fields: Vec<String>,
    },

    /// Append a field to an existing receipt type.
    AddField {
        /// Receipt type id.
        id: i64,

        /// Field spec "name[:description[:required]]".
        field: String,
    },

    /// Delete a receipt type and its fields.
    Rm { id: i64 },
}

#[derive(Subcommand, Debug)]
enum EmployeesAction {
    /// List employees.
    List,

    /// Create an employee.
    Add { name: String },

    /// Delete an employee; their receipts remain, unattributed.
    Rm { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress output replaces INFO logs during ingest; verbose wins.
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

    let pool = store::open(&cli.db)
        .await
        .with_context(|| format!("failed to open database '{}'", cli.db))?;
    let schemas = SqliteSchemaStore::new(pool.clone());
    let records = SqliteRecordStore::new(pool);

    match cli.command {
        Command::Init => {
            if !cli.quiet {
                println!("{} database ready at {}", green("✔"), bold(&cli.db));
            }
        }

        Command::Ingest(args) => {
            run_ingest(args, &schemas, &records, cli.quiet).await?;
        }

        Command::Types { action } => match action {
            TypesAction::List => {
                use img2rec::store::SchemaStore as _;
                let types = schemas.list_receipt_types(None).await?;
                if types.is_empty() {
                    println!("no receipt types yet — add one with: img2rec types add");
                }
                for t in types {
                    print_type(&t);
                }
            }
            TypesAction::Show { id } => match schemas.get_receipt_type(id).await? {
                Some(t) => print_type(&t),
                None => bail!("receipt type {id} not found"),
            },
            TypesAction::Add {
                name,
                description,
                fields,
            } => {
                let fields = fields
                    .iter()
                    .map(|spec| parse_field_spec(spec))
                    .collect::<Result<Vec<_>>>()?;
                let id = schemas
                    .add_receipt_type(&name, description.as_deref(), &fields)
                    .await?;
                println!("{} created receipt type {} ({})", green("✔"), id, name);
            }
            TypesAction::AddField { id, field } => {
                let field = parse_field_spec(&field)?;
                schemas.add_field(id, &field).await?;
                println!("{} added field '{}' to type {}", green("✔"), field.name, id);
            }
            TypesAction::Rm { id } => {
                schemas.delete_receipt_type(id).await?;
                println!("{} deleted receipt type {}", green("✔"), id);
            }
        },

        Command::Employees { action } => match action {
            EmployeesAction::List => {
                for e in records.list_employees().await? {
                    println!("{:>4}  {}", e.id, e.name);
                }
            }
            EmployeesAction::Add { name } => {
                let employee = records.add_employee(&name).await?;
                println!("{} created employee {} ({})", green("✔"), employee.id, name);
            }
            EmployeesAction::Rm { id } => {
                records.delete_employee(id).await?;
                println!("{} deleted employee {}", green("✔"), id);
            }
        },

        Command::Records { limit } => {
            for r in records.list_receipts(limit).await? {
                println!(
                    "{:>4}  {}  {:<16} {:<12} {}",
                    r.id,
                    r.created_at.format("%Y-%m-%d %H:%M"),
                    r.receipt_type_name.as_deref().unwrap_or("?"),
                    r.employee_name.as_deref().unwrap_or("-"),
                    dim(&r.image_path),
                );
            }
        }

        Command::Export { output, ids } => {
            let rows = match ids {
                Some(ids) => {
                    let mut rows = Vec::with_capacity(ids.len());
                    for id in ids {
                        match records.get_receipt_details(id).await? {
                            Some(row) => rows.push(row),
                            None => bail!("receipt {id} not found"),
                        }
                    }
                    rows
                }
                None => records.list_receipts(None).await?,
            };

            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    export_receipts_csv(&rows, file)?;
                    if !cli.quiet {
                        eprintln!(
                            "{} exported {} receipts → {}",
                            green("✔"),
                            rows.len(),
                            bold(&path.display().to_string())
                        );
                    }
                }
                None => {
                    let stdout = io::stdout();
                    export_receipts_csv(&rows, stdout.lock())?;
                }
            }
        }

        Command::Images { upload_dir } => {
            for name in storage::list_uploads(&upload_dir).await? {
                println!("{name}");
            }
        }
    }

    Ok(())
}

async fn run_ingest(
    args: IngestArgs,
    schemas: &SqliteSchemaStore,
    records: &SqliteRecordStore,
    quiet: bool,
) -> Result<()> {
    // ── Read the images ──────────────────────────────────────────────────
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image '{}'", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        files.push(UploadedImage::new(name, bytes));
    }

    // ── Build config ─────────────────────────────────────────────────────
    let show_progress = !quiet && !args.no_progress && !args.json;

    let mut builder = IngestConfig::builder()
        .upload_dir(args.upload_dir)
        .language_hint(args.language)
        .max_tokens(args.max_tokens)
        .max_retries(args.max_retries);
    if let Some(secs) = args.api_timeout {
        builder = builder.api_timeout_secs(secs);
    }
    if show_progress {
        builder = builder.progress_callback(CliProgress::new() as ProgressCallback);
    }

    let mut config = builder.build().context("invalid configuration")?;
    config.model = args.model;
    config.provider_name = args.provider;

    // ── Run the batch ────────────────────────────────────────────────────
    let request = BatchRequest {
        employee_id: args.employee,
        receipt_type_ids: args.types,
        files,
    };

    let output = ingest(request, schemas, records, &config)
        .await
        .context("ingestion failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&output).context("failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    // The progress callback already printed per-file ✓/✗ lines; add detail
    // for anything worth following up.
    for result in &output.results {
        if let Some(error) = &result.error {
            eprintln!("  {}  {}", red("✗"), error);
        } else if !result.missing_required.is_empty() {
            eprintln!(
                "  {}  '{}' stored with empty required fields: {}",
                cyan("⚠"),
                result.original_name,
                result.missing_required.join(", ")
            );
        }
    }

    if !quiet && !show_progress {
        eprintln!(
            "Persisted {}/{} files in {}ms",
            output.stats.persisted, output.stats.total_files, output.stats.total_duration_ms
        );
    }

    io::stdout().flush().ok();
    Ok(())
}

fn print_type(t: &img2rec::ReceiptType) {
    println!(
        "{:>4}  {}{}",
        t.id,
        bold(&t.name),
        t.description
            .as_deref()
            .map(|d| format!("  {}", dim(d)))
            .unwrap_or_default()
    );
    for f in &t.fields {
        println!(
            "       - {}{}{}",
            f.name,
            f.description
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default(),
            if f.is_required { " (required)" } else { "" }
        );
    }
}

/// Parse a `--field` spec: `name[:description[:required]]`.
fn parse_field_spec(spec: &str) -> Result<FieldDef> {
    let mut parts = spec.splitn(3, ':');
    let name = parts.next().unwrap_or_default().trim().to_string();
    if name.is_empty() {
        bail!("field spec '{spec}' has no name");
    }
    let description = parts
        .next()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    let is_required = match parts.next().map(|r| r.trim().to_ascii_lowercase()) {
        None => false,
        Some(r) if r == "required" => true,
        Some(r) if r == "optional" || r.is_empty() => false,
        Some(r) => bail!("field spec '{spec}': expected 'required' or 'optional', got '{r}'"),
    };

    Ok(FieldDef {
        name,
        description,
        is_required,
    })
}
