//! CLI entry point for the video similarity search engine.
//!
//! Provides commands for ingesting embeddings, searching, and maintaining
//! the on-disk index. Main components: Cli parser, Commands enum, and one
//! handler per command on top of `SearchService`.

use anyhow::{Context, Result, bail};
use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use vidsearch::display::{
    THEME, Theme, create_help_text, create_progress_bar, create_results_table,
    create_stats_table, create_verify_table, with_spinner,
};
use vidsearch::{
    EmbedInput, EmbeddingGenerator, Filter, Metadata, MockEmbeddingGenerator, RebuildOutcome,
    SearchRequest, SearchService, Settings, VectorDimension,
};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Video similarity search engine
#[derive(Parser)]
#[command(
    name = "vidsearch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Video similarity search engine",
    long_about = "Store video embeddings and answer top-k similarity queries over an IVF index.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = create_help_text()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Set up .vidsearch directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Insert or replace one video embedding
    Upsert {
        /// Video id
        video_id: String,

        #[command(flatten)]
        vector: VectorSource,

        /// Metadata entry, repeatable
        #[arg(short, long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,
    },

    /// Load embeddings from a JSON lines file
    #[command(
        after_help = "Each line: {\"video_id\": \"abc\", \"vector\": [0.1, ...], \"metadata\": {\"title\": \"...\"}}"
    )]
    Import {
        /// JSON lines file
        path: PathBuf,

        /// Show progress during import
        #[arg(short, long)]
        progress: bool,

        /// Rebuild the index once every line is stored
        #[arg(long)]
        rebuild: bool,
    },

    /// Delete a video
    Delete {
        /// Video id
        video_id: String,
    },

    /// Find the most similar videos
    Search {
        #[command(flatten)]
        vector: VectorSource,

        /// Number of results
        #[arg(short, long, default_value_t = 10)]
        k: usize,

        /// Equality filter on metadata, repeatable
        #[arg(short, long = "filter", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// Filter tree as JSON, combined with --filter
        #[arg(long, value_name = "JSON")]
        filter_json: Option<String>,

        /// Time budget in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Lists to probe (overrides config)
        #[arg(long)]
        nprobe: Option<usize>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the index from the store
    Rebuild,

    /// Show index and store statistics
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the index serves exactly what the store holds
    Verify {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

/// Where a query or record vector comes from.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct VectorSource {
    /// Comma-separated components
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    vector: Option<Vec<f32>>,

    /// JSON file holding an array of numbers
    #[arg(long)]
    vector_file: Option<PathBuf>,

    /// Text embedded with the built-in hashing embedder (demo quality)
    #[arg(long)]
    text: Option<String>,
}

/// One line of an import file.
#[derive(Debug, Deserialize)]
struct ImportLine {
    video_id: String,
    #[serde(alias = "embedding")]
    vector: Vec<f32>,
    #[serde(default)]
    metadata: Metadata,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "vidsearch=debug"
    } else {
        "vidsearch=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path).map_err(|e| {
            anyhow::anyhow!("configuration error loading from {}: {e}", path.display())
        })?,
        None => Settings::load().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?,
    };
    settings.debug |= cli.debug;
    Ok(settings)
}

fn resolve_vector(source: &VectorSource, dimension: usize) -> Result<Vec<f32>> {
    if let Some(vector) = &source.vector {
        return Ok(vector.clone());
    }
    if let Some(path) = &source.vector_file {
        return read_vector_file(path);
    }
    if let Some(text) = &source.text {
        let generator = MockEmbeddingGenerator::with_dimension(VectorDimension::new(dimension)?);
        return Ok(generator.embed(&EmbedInput::Text(text.clone()))?);
    }
    bail!("one of --vector, --vector-file or --text is required")
}

fn read_vector_file(path: &Path) -> Result<Vec<f32>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} does not hold a JSON array of numbers", path.display()))
}

fn build_filter(pairs: &[(String, String)], json: Option<&str>) -> Result<Filter> {
    let filter = Filter::from_pairs(pairs.iter().cloned());
    match json {
        Some(json) => {
            let tree: Filter = serde_json::from_str(json).context("parsing --filter-json")?;
            Ok(filter.and(tree))
        }
        None => Ok(filter),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match &cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(*force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!(
                "{}",
                THEME.success_with_icon(&format!("Created configuration file at {}", path.display()))
            );
            println!("Edit this file to customize your settings.");
            return Ok(());
        }
        Commands::Config => {
            let settings = load_settings(&cli)?;
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            return Ok(());
        }
        _ => {}
    }

    let settings = Arc::new(load_settings(&cli)?);
    let service = SearchService::open(Arc::clone(&settings))
        .with_context(|| format!("opening index at {}", settings.index_path.display()))?;

    let result = run(&cli.command, &service, &settings);

    // Let a background rebuild finish before the process exits
    service.manager().wait_for_rebuild();
    result
}

fn run(command: &Commands, service: &SearchService, settings: &Settings) -> Result<()> {
    match command {
        Commands::Init { .. } | Commands::Config => Ok(()),

        Commands::Upsert {
            video_id,
            vector,
            metadata,
        } => {
            let vector = resolve_vector(vector, settings.index.dimension)?;
            let metadata: Metadata = metadata.iter().cloned().collect();
            let version = service.upsert(video_id, vector, metadata)?;
            println!(
                "{}",
                THEME.success_with_icon(&format!("Stored '{video_id}' as version {version}"))
            );
            Ok(())
        }

        Commands::Import {
            path,
            progress,
            rebuild,
        } => import(service, path, *progress, *rebuild),

        Commands::Delete { video_id } => {
            if service.delete(video_id)? {
                println!("{}", THEME.success_with_icon(&format!("Deleted '{video_id}'")));
            } else {
                println!("{}", THEME.warning_with_icon(&format!("'{video_id}' not found")));
            }
            Ok(())
        }

        Commands::Search {
            vector,
            k,
            filters,
            filter_json,
            deadline_ms,
            nprobe,
            json,
        } => {
            let query = resolve_vector(vector, settings.index.dimension)?;
            let filter = build_filter(filters, filter_json.as_deref())?;

            let mut request = SearchRequest::new(query, *k).with_filter(filter);
            if let Some(ms) = deadline_ms {
                request = request.with_deadline_millis(*ms);
            }
            if let Some(nprobe) = nprobe {
                request = request.with_nprobe(*nprobe);
            }
            let response = service.execute(&request)?;

            if *json {
                return print_json(&response);
            }
            if response.hits.is_empty() {
                println!("No matching videos.");
            } else {
                println!("{}", create_results_table(&response));
            }
            println!("{}", THEME.search_summary(&response));
            if response.partial {
                println!(
                    "{}",
                    THEME.warning_with_icon("Deadline reached; results are partial")
                );
            }
            Ok(())
        }

        Commands::Rebuild => {
            let outcome = with_spinner("Rebuilding index...", || service.rebuild())?;
            match outcome {
                RebuildOutcome::Completed(summary) => println!(
                    "{}",
                    THEME.success_with_icon(&format!(
                        "Segment {} built: {} videos in {} lists ({:.1?})",
                        summary.segment_id, summary.records, summary.nlist, summary.duration
                    ))
                ),
                other => println!("{}", THEME.warning_with_icon(&format!("Rebuild {other:?}"))),
            }
            Ok(())
        }

        Commands::Stats { json } => {
            let stats = service.stats();
            if *json {
                return print_json(&stats);
            }
            println!("{}", create_stats_table(&stats));
            Ok(())
        }

        Commands::Verify { json } => {
            let report = service.verify();
            if *json {
                print_json(&report)?;
            } else if report.is_consistent() {
                println!(
                    "{}",
                    THEME.success_with_icon(&format!(
                        "Index generation {} matches the store ({} videos)",
                        report.generation, report.store_records
                    ))
                );
            } else {
                println!("{}", THEME.verify_failure(&report));
                println!("{}", create_verify_table(&report));
            }
            if !report.is_consistent() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn import(service: &SearchService, path: &Path, progress: bool, rebuild: bool) -> Result<()> {
    let started = Instant::now();
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("reading {}", path.display()))?;

    let bar = (progress && !Theme::should_disable_colors())
        .then(|| create_progress_bar(lines.len() as u64, "importing"));

    let mut imported = 0usize;
    let mut failed = 0usize;
    for (number, line) in lines.iter().enumerate() {
        if let Some(bar) = &bar {
            bar.inc(1);
        }
        if line.trim().is_empty() {
            continue;
        }
        let outcome = serde_json::from_str::<ImportLine>(line)
            .map_err(anyhow::Error::from)
            .and_then(|record| {
                service
                    .upsert(&record.video_id, record.vector, record.metadata)
                    .map_err(anyhow::Error::from)
            });
        match outcome {
            Ok(_) => imported += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!("{}:{}: {e}", path.display(), number + 1);
            }
        }
    }

    if let Some(bar) = bar {
        bar.finish_with_message("done");
    }

    if rebuild {
        service.manager().wait_for_rebuild();
        with_spinner("Rebuilding index...", || service.rebuild())?;
    }

    println!(
        "{}",
        THEME.success_with_icon(&format!(
            "Imported {imported} videos in {:.1?}",
            started.elapsed()
        ))
    );
    if failed > 0 {
        println!(
            "{}",
            THEME.warning_with_icon(&format!("{failed} lines skipped, see log for details"))
        );
    }
    Ok(())
}
