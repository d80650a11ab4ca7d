//! romshift - ROM collection scanner, verifier and repackager

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use romshift::copier::{CopyListener, JobKey};
use romshift::matcher::{group_by_parent, match_catalog};
use romshift::plan::plan_copies;
use romshift::{
    ArchiveError, ArchiveKind, Catalog, Copier, CopyConfig, ScanConfig, ScanRecord, ScanResultIndex, Scanner,
};

#[derive(Parser)]
#[command(name = "romshift")]
#[command(version)]
#[command(about = "Scan, verify and repackage ROM collections against DAT catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads for scanning and copying (default: half the CPUs)
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Read buffer size in bytes (default: sized from the catalog)
    #[arg(long, global = true)]
    buffer_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Digest every file and archive member under a directory
    Scan {
        /// Directory to scan
        dir: PathBuf,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check directories against a catalog
    Verify {
        /// Catalog JSON file
        #[arg(short, long)]
        dat: PathBuf,

        /// Directories to scan
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },

    /// Rebuild matched games into an output directory
    Sort {
        /// Catalog JSON file
        #[arg(short, long)]
        dat: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: none, zip, 7z, tar, tar.gz, tar.bz2, tar.xz, tar.lzma, tar.lz4
        #[arg(short, long, default_value = "none")]
        format: String,

        /// Replace outputs that already exist
        #[arg(long)]
        overwrite: bool,

        /// Directories to scan
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(if cli.verbose { "romshift=debug".parse()? } else { "romshift=warn".parse()? }),
            )
            .init();
    }

    match cli.command {
        Commands::Scan { ref dir, json } => {
            let config = scan_config(&cli, None);
            let records = scan_dirs(std::slice::from_ref(dir), config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!(
                        "{}  {}  {}  {:>12}  {}",
                        record.digest.crc32, record.digest.md5, record.digest.sha1, record.size, record
                    );
                }
                eprintln!("\nTotal: {} files", records.len());
            }
        }

        Commands::Verify { ref dat, ref dirs } => {
            let catalog = Catalog::load(dat)?;
            let index = ScanResultIndex::build(scan_dirs(dirs, scan_config(&cli, Some(&catalog)))?);
            let report = match_catalog(&catalog, &index, None);

            println!("=== {} ===", if catalog.name.is_empty() { "Catalog" } else { catalog.name.as_str() });
            for found in &report.matched {
                println!("OK       {}", found.game);
            }
            for failure in &report.failed {
                println!("MISSING  {}", failure);
            }
            let sets = group_by_parent(&catalog, &report.matched);
            println!(
                "\n{} of {} games complete ({} parent sets), {} incomplete",
                report.matched.len(),
                catalog.games.len(),
                sets.len(),
                report.failed.len()
            );
        }

        Commands::Sort {
            ref dat,
            ref output,
            ref format,
            overwrite,
            ref dirs,
        } => {
            let kind = ArchiveKind::from_extension(format)
                .with_context(|| format!("Unknown output format: {}", format))?;
            if kind == ArchiveKind::Rar {
                anyhow::bail!("RAR output is not supported");
            }
            romshift::archive::ensure_codec_available(kind)?;

            let catalog = Catalog::load(dat)?;
            let index = ScanResultIndex::build(scan_dirs(dirs, scan_config(&cli, Some(&catalog)))?);
            let desired = kind.is_archive().then_some(kind);
            let matches = match_catalog(&catalog, &index, desired);
            for failure in &matches.failed {
                println!("SKIP  {}", failure);
            }

            let jobs = plan_copies(&matches.matched, output, desired);
            std::fs::create_dir_all(output)
                .with_context(|| format!("Failed to create output directory: {}", output.display()))?;

            let mut config = CopyConfig {
                overwrite,
                ..Default::default()
            };
            if let Some(threads) = cli.threads {
                config.threads = threads;
            }
            if let Some(size) = cli.buffer_size {
                config.buffer_size = size;
            }
            let copier = Copier::new(config)?;
            let listener = BarListener::new(jobs.len() as u64);
            let report = copier.copy(&jobs, &listener);
            listener.finish();

            println!("\n=== Sort Summary ===");
            println!("Games:  {} matched, {} incomplete", matches.matched.len(), matches.failed.len());
            println!(
                "Jobs:   {} copied, {} skipped, {} failed ({} bytes)",
                report.copied,
                report.skipped,
                report.failed.len(),
                report.bytes
            );
            for failure in &report.failed {
                let hint = match failure.error {
                    ArchiveError::UnsupportedCodec { .. } => " (rebuild with the codec feature)",
                    _ => "",
                };
                println!("FAILED {} -> {}: {}{}", failure.source.display(), failure.destination.display(), failure.error, hint);
            }
            if report.is_success() {
                println!("\nSort complete!");
            }
        }
    }

    Ok(())
}

fn scan_config(cli: &Cli, catalog: Option<&Catalog>) -> ScanConfig {
    let mut config = match catalog {
        Some(catalog) => ScanConfig::for_catalog(catalog),
        None => ScanConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(size) = cli.buffer_size {
        config.buffer_size = size;
    }
    config
}

fn scan_dirs(dirs: &[PathBuf], config: ScanConfig) -> Result<Vec<ScanRecord>> {
    let scanner = Scanner::new(config)?;
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] Scanning {pos} files | {wide_msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut records = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            anyhow::bail!("Not a directory: {}", dir.display());
        }
        let on_file = |path: &Path| {
            pb.inc(1);
            pb.set_message(path.display().to_string());
        };
        records.extend(scanner.scan_with_progress(dir, &on_file));
    }
    pb.finish_and_clear();
    Ok(records)
}

/// Overall job bar; the message shows the latest progress report.
struct BarListener {
    pb: ProgressBar,
}

impl BarListener {
    fn new(jobs: u64) -> Self {
        let pb = ProgressBar::new(jobs);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] Copying [{bar:40.cyan/blue}] {pos}/{len} | {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        BarListener { pb }
    }

    fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl CopyListener for BarListener {
    fn on_progress(&self, key: &JobKey, percent: u8, bytes_per_second: f64) {
        let name = key
            .destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.pb.set_message(format!(
            "{} {}% ({:.1} MB/s)",
            name,
            percent,
            bytes_per_second / 1_000_000.0
        ));
    }

    fn on_skip(&self, key: &JobKey, reason: &str) {
        self.pb.inc(1);
        self.pb.println(format!("SKIP: {} ({})", key.destination.display(), reason));
    }

    fn on_failure(&self, key: &JobKey, error: &ArchiveError) {
        self.pb.inc(1);
        self.pb.println(format!("FAIL: {} - {}", key.destination.display(), error));
    }

    fn on_finish(&self, key: &JobKey, _bytes: u64) {
        self.pb.inc(1);
        self.pb.println(format!("OK: {}", key.destination.display()));
    }
}
