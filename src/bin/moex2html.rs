//! CLI binary for moex-xml2html.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use moex_xml2html::intake::{check_upload, download_name};
use moex_xml2html::{
    convert_to_file, convert_to_store, ConversionProgressCallback, ConversionRequest, Converter,
    ConverterConfig, ProgressCallback, TempStore,
};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner naming the candidate being tried,
/// with one log line per failed candidate.
struct CliProgressCallback {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading report…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, candidates: usize) {
        self.bar.set_prefix("Converting");
        self.bar
            .set_message(format!("{candidates} stylesheet candidate(s)"));
    }

    fn on_candidate_start(&self, index: usize, total: usize, url: &str) {
        self.bar.set_message(format!("[{index}/{total}] {url}"));
    }

    fn on_candidate_failed(&self, index: usize, total: usize, url: &str, error: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 100 {
            let head: String = error.chars().take(99).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>2}/{:<2} {}\n        {}",
            red("✗"),
            index,
            total,
            dim(url),
            red(&msg),
        ));
    }

    fn on_conversion_complete(&self, stylesheet_url: Option<&str>) {
        self.bar.finish_and_clear();
        match stylesheet_url {
            Some(url) => eprintln!("{} converted with {}", green("✔"), bold(url)),
            None => eprintln!(
                "{} all {} stylesheet candidate(s) failed",
                red("✘"),
                self.failures.load(Ordering::SeqCst)
            ),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert to stdout
  moex2html CCX99_report.xml

  # Convert to a file
  moex2html CCX99_report.xml -o report.html

  # Force a stylesheet
  moex2html --xslt https://ftp.moex.com/pub/Reports/Currency/XSLT/CCX99_RU_23062025.xsl report.xml

  # Keep the result in the temp store and print its id
  moex2html --store report.xml

  # Check well-formedness, or conformance to a schema
  moex2html --validate report.xml
  moex2html --validate --xsd 'C:\MICEX\XSD\CCX99.xsd' report.xml

  # Remove stored results older than the configured lifetime
  moex2html --cleanup

STYLESHEET RESOLUTION:
  1. --xslt, if given
  2. every <?xml-stylesheet href="..."?> in the report, in order; legacy
     C:\MICEX\XSLT\ paths are rebased onto --xslt-base
  3. --default-stylesheet under --xslt-base, when neither of the above exist
  The first candidate that downloads and applies cleanly wins.

ENVIRONMENT VARIABLES:
  MOEX_XSLT_BASE       Base URL for stylesheets
  MOEX_XSD_BASE        Base URL for schemas
  MOEX_TIMEOUT         Fetch timeout in seconds
  MOEX_TEMP_DIR        Temp store directory
  RUST_LOG             Log filter (overrides -v / -q)
"#;

/// Convert MOEX XML reports to HTML using the exchange's XSLT stylesheets.
#[derive(Parser, Debug)]
#[command(
    name = "moex2html",
    version,
    about = "Convert MOEX XML reports to HTML using the exchange's XSLT stylesheets",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Report to convert.
    #[arg(required_unless_present = "cleanup")]
    input: Option<PathBuf>,

    /// Write HTML to this file instead of stdout.
    #[arg(short, long, env = "MOEX_OUTPUT", conflicts_with = "store")]
    output: Option<PathBuf>,

    /// Stylesheet URL to try before any the report names.
    #[arg(long, env = "MOEX_XSLT")]
    xslt: Option<String>,

    /// Only check the report; do not convert.
    #[arg(long)]
    validate: bool,

    /// Schema URL (or legacy C:\MICEX\XSD\ path) for --validate.
    #[arg(long, requires = "validate")]
    xsd: Option<String>,

    /// Keep the HTML in the temp store and print its id and path.
    #[arg(long)]
    store: bool,

    /// Delete stored results older than the temp-file lifetime.
    #[arg(long)]
    cleanup: bool,

    /// Output structured JSON instead of HTML.
    #[arg(long, env = "MOEX_JSON")]
    json: bool,

    /// Stylesheet and schema fetch timeout in seconds.
    #[arg(long, env = "MOEX_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Base URL legacy stylesheet paths are rebased onto.
    #[arg(long, env = "MOEX_XSLT_BASE")]
    xslt_base: Option<String>,

    /// Base URL legacy schema paths are rebased onto.
    #[arg(long, env = "MOEX_XSD_BASE")]
    xsd_base: Option<String>,

    /// Stylesheet file name used when the report names none.
    #[arg(long, env = "MOEX_DEFAULT_STYLESHEET")]
    default_stylesheet: Option<String>,

    /// Temp store directory.
    #[arg(long, env = "MOEX_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Disable progress spinner.
    #[arg(long, env = "MOEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MOEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MOEX_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; keep INFO logs out of
    // its way unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.validate;
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Cleanup ──────────────────────────────────────────────────────────
    if cli.cleanup {
        let store = TempStore::from_config(&config).context("Failed to open temp store")?;
        let deleted = store.cleanup(config.temp_file_lifetime);
        if !cli.quiet {
            eprintln!(
                "Removed {} stored file(s) from {}",
                deleted,
                store.dir().display()
            );
        }
        if cli.input.is_none() {
            return Ok(());
        }
    }

    let Some(ref input) = cli.input else {
        return Ok(());
    };
    let xml = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    check_upload(&file_name, xml.len(), &config)?;

    // ── Validate-only mode ───────────────────────────────────────────────
    if cli.validate {
        let converter = Converter::new(config).context("Failed to create converter")?;
        let report = converter.validate(&xml, cli.xsd.as_deref()).await;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else if report.valid {
            println!("{} {}", green("✔"), report.message);
        } else {
            println!("{} {} ({})", red("✘"), report.message, report.kind);
        }
        if !report.valid {
            std::process::exit(1);
        }
        return Ok(());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    if cli.store {
        let store = TempStore::from_config(&config).context("Failed to open temp store")?;
        let (output, stored) = convert_to_store(&xml, cli.xslt.as_deref(), &store, &config)
            .await
            .context("Conversion failed")?;

        if cli.json {
            let json = serde_json::json!({
                "id": stored.id,
                "path": stored.path,
                "download_name": download_name(&file_name, "converted", &stored.id),
                "stylesheet_url": output.stylesheet_url,
                "stats": output.stats,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&json).context("Failed to serialise output")?
            );
        } else {
            println!("{}", stored.id);
            if !cli.quiet {
                eprintln!(
                    "   {}  →  {}",
                    dim(&download_name(&file_name, "converted", &stored.id)),
                    bold(&stored.path.display().to_string())
                );
            }
        }
    } else if let Some(ref output_path) = cli.output {
        let output = convert_to_file(&xml, cli.xslt.as_deref(), output_path, &config)
            .await
            .context("Conversion failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {} bytes  {}ms  →  {}",
                green("✔"),
                output.stats.html_bytes,
                output.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let converter = Converter::new(config).context("Failed to create converter")?;
        let mut request = ConversionRequest::new(xml);
        if let Some(ref url) = cli.xslt {
            request = request.with_stylesheet(url.as_str());
        }
        let output = converter
            .convert(&request)
            .await
            .context("Conversion failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.html.as_bytes())
                .context("Failed to write to stdout")?;
            if !output.html.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }

        if !cli.quiet && !show_progress && !cli.json {
            eprintln!(
                "Converted with {} ({}/{} candidates) in {}ms",
                output.stylesheet_url,
                output.stats.attempted,
                output.stats.candidates,
                output.stats.total_duration_ms
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ConverterConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConverterConfig> {
    let mut builder = ConverterConfig::builder().fetch_timeout_secs(cli.timeout);

    if let Some(ref base) = cli.xslt_base {
        builder = builder.xslt_base_url(base.as_str());
    }
    if let Some(ref base) = cli.xsd_base {
        builder = builder.xsd_base_url(Some(base.clone()));
    }
    if let Some(ref name) = cli.default_stylesheet {
        builder = builder.default_stylesheet(name.as_str());
    }
    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
