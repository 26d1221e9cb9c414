use bzip2::read::BzDecoder;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use wiktionary_template_scanner::dump::{extract_page, process_page, scan_pages, ProcessedPage, ScanMode, Stats};
use wiktionary_template_scanner::parallel::{process_channel_pipeline, write_page, ParallelConfig};
use wiktionary_template_scanner::schema::{find_schema_file, Schema};

/// Processing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Sequential processing
    Sequential,
    /// Reader thread, worker threads, in-order writer
    ChannelPipeline,
}

#[derive(Parser)]
#[command(name = "wiktionary-template-scanner")]
#[command(about = "Extract template-driven entries from a Wiktionary XML dump - one JSON line per entry")]
struct Args {
    /// Input XML file (.xml or .xml.bz2)
    input: PathBuf,

    /// Output JSONL file
    output: PathBuf,

    /// Path to schema YAML file (default: schema/english.yaml)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Processing strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::ChannelPipeline)]
    strategy: Strategy,

    /// Number of worker threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Channel buffer size for channel-pipeline strategy
    #[arg(long, default_value_t = 10000)]
    channel_buffer: usize,

    /// Limit number of records to write (sequential strategy only)
    #[arg(long)]
    limit: Option<usize>,

    /// Limit number of pages to scan
    #[arg(long)]
    page_limit: Option<usize>,

    /// Parse every template in the language section and write the failures
    /// instead of entries
    #[arg(long)]
    template_report: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,
}

fn open_input(path: &Path) -> std::io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    Ok(if path.to_string_lossy().ends_with(".bz2") {
        Box::new(BufReader::with_capacity(256 * 1024, BzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(256 * 1024, file))
    })
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        pb.set_style(style);
    }
    pb
}

/// Run sequential processing
fn run_sequential(
    reader: impl BufRead,
    writer: &mut impl Write,
    schema: &Schema,
    mode: ScanMode,
    limit: Option<usize>,
    page_limit: Option<usize>,
    quiet: bool,
) -> std::io::Result<Stats> {
    let start_time = Instant::now();
    let mut stats = Stats::default();
    let pb = spinner(quiet);
    let mut page_id = 0;
    let mut limit_reached = false;
    let mut write_error = None;

    scan_pages(reader, |page_xml| {
        if page_limit.is_some_and(|l| page_id >= l) {
            return false;
        }
        let page = match extract_page(&page_xml, page_id) {
            Some(raw) => process_page(raw, schema, mode),
            None => ProcessedPage::unreadable(page_id),
        };
        page_id += 1;

        if let Err(e) = write_page(&page, &mut stats, &mut *writer) {
            write_error = Some(e);
            return false;
        }

        if !quiet && stats.pages_processed % 1000 == 0 {
            let elapsed = start_time.elapsed().as_secs_f64();
            let rate = stats.pages_processed as f64 / elapsed;
            pb.set_message(format!(
                "Pages: {} | Parsed: {} | Records: {} | Rate: {:.0} pg/s",
                stats.pages_processed, stats.pages_parsed, stats.records_written, rate
            ));
        }

        if limit.is_some_and(|l| stats.records_written >= l) {
            limit_reached = true;
            return false;
        }
        page_limit.map_or(true, |l| page_id < l)
    })?;

    if let Some(e) = write_error {
        return Err(e);
    }
    writer.flush()?;

    match limit {
        Some(l) if limit_reached => pb.finish_with_message(format!("Reached limit of {} records", l)),
        _ => pb.finish_and_clear(),
    }

    stats.elapsed = start_time.elapsed();
    Ok(stats)
}

fn print_stats(stats: &Stats, strategy_name: &str, mode: ScanMode) {
    println!();
    println!("============================================================");
    println!("Strategy: {}", strategy_name);
    println!("Pages processed: {}", stats.pages_processed);
    println!("Pages parsed: {}", stats.pages_parsed);
    match mode {
        ScanMode::Entries => {
            println!("Entries written: {}", stats.records_written);
            println!(
                "Avg entries/page: {:.2}",
                stats.records_written as f64 / stats.pages_parsed.max(1) as f64
            );
        }
        ScanMode::TemplateReport => {
            println!("Templates checked: {}", stats.templates_checked);
            println!("Template failures: {}", stats.records_written);
        }
    }
    println!("------------------------------------------------------------");
    println!("Special pages: {}", stats.special);
    println!("Redirects: {}", stats.redirects);
    println!("No language section: {}", stats.no_language);
    println!("Skipped: {}", stats.skipped);
    println!("Time: {}m {}s", stats.elapsed.as_secs() / 60, stats.elapsed.as_secs() % 60);
    println!(
        "Rate: {:.0} pages/sec",
        stats.pages_processed as f64 / stats.elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("============================================================");
}

fn main() -> std::io::Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let args = Args::parse();

    let schema_path = match args.schema.clone() {
        Some(p) => p,
        None => match find_schema_file("english.yaml") {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Error loading schema: {}", e);
                std::process::exit(1);
            }
        },
    };
    let schema = match Schema::load(&schema_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading schema: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("loaded schema {} for {}", schema_path.display(), schema.language());

    // --limit requires sequential mode for early termination
    if args.limit.is_some() && args.strategy != Strategy::Sequential {
        eprintln!(
            "Error: --limit requires --strategy sequential for efficient early termination.\n\
             The channel pipeline processes pages out of order and reorders results,\n\
             so it cannot stop as soon as the limit is reached."
        );
        std::process::exit(1);
    }

    let mode = if args.template_report {
        ScanMode::TemplateReport
    } else {
        ScanMode::Entries
    };

    let mut config = ParallelConfig::default();
    if args.threads > 0 {
        config.num_workers = args.threads;
    }
    config.channel_buffer = args.channel_buffer;

    if !args.quiet {
        println!("Parsing: {}", args.input.display());
        println!("Output: {}", args.output.display());
        println!("Schema: {} ({})", schema_path.display(), schema.language());
        println!("Strategy: {:?}", args.strategy);
        if args.strategy != Strategy::Sequential {
            println!("Workers: {}", config.num_workers);
        }
        if let Some(limit) = args.limit {
            println!("Limit: {} records", limit);
        }
        if let Some(limit) = args.page_limit {
            println!("Page limit: {}", limit);
        }
        println!();
    }

    let reader = open_input(&args.input)?;
    let output = File::create(&args.output)?;

    let stats = match args.strategy {
        Strategy::Sequential => {
            let mut writer = BufWriter::with_capacity(256 * 1024, output);
            run_sequential(
                reader,
                &mut writer,
                &schema,
                mode,
                args.limit,
                args.page_limit,
                args.quiet,
            )?
        }
        Strategy::ChannelPipeline => {
            let pb = spinner(args.quiet);
            pb.set_message("Processing pages...");
            pb.enable_steady_tick(std::time::Duration::from_millis(200));
            let stats = process_channel_pipeline(
                reader,
                output,
                Arc::new(schema),
                mode,
                &config,
                args.page_limit,
            )?;
            pb.finish_and_clear();
            stats
        }
    };

    if !args.quiet {
        print_stats(&stats, &format!("{:?}", args.strategy), mode);
    }

    Ok(())
}
