use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use proxy_sieve::{
    tui::ProgressMonitor, Anonymity, CandidateSet, Category, CheckMode, CheckReport, Config,
    Extraction, LogProgress, Pipeline, ProxyChecker, ProxyCrawler, ProxyParser, ProxyStore,
    ProxyType, Source,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Scrape, validate and cache open proxies
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "Scrape, validate and cache open proxies", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (overrides DATABASE_URL)
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// Source URLs to scrape (can specify multiple)
    #[arg(short = 's', long = "source")]
    sources: Vec<String>,
    /// File containing source URLs, one per line
    #[arg(short = 'f', long)]
    source_file: Option<PathBuf>,
    /// Use the sources registered in the database
    #[arg(long)]
    from_db: bool,
    /// Use well-known public proxy lists
    #[arg(long)]
    common_sources: bool,
    /// Stop scraping once this many unique candidates are found
    #[arg(short, long)]
    limit: Option<usize>,
    /// Source fetches in flight
    #[arg(long)]
    fetch_concurrency: Option<usize>,
}

#[derive(Args, Clone)]
struct CheckArgs {
    /// fast or thorough
    #[arg(short, long, default_value = "thorough")]
    mode: CheckMode,
    /// Also try SOCKS4/SOCKS5 on every candidate
    #[arg(long)]
    include_socks: bool,
    /// Probes in flight (overrides MAX_CONCURRENT)
    #[arg(short = 'n', long)]
    concurrency: Option<usize>,
    /// Probe timeout in seconds (overrides DEFAULT_TIMEOUT)
    #[arg(long)]
    timeout: Option<f64>,
    /// Candidates per batch (overrides BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,
    /// MaxMind MMDB file for country lookup (overrides MMDB_PATH)
    #[arg(long)]
    mmdb: Option<String>,
    /// Directory for per-category result files
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Show a live progress monitor
    #[arg(long)]
    tui: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape candidates from sources
    Scrape {
        #[command(flatten)]
        sources: SourceArgs,
        /// Output file for candidates
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate candidates from a file and cache the working ones
    Check {
        /// Input file containing proxies
        input: PathBuf,
        #[command(flatten)]
        check: CheckArgs,
    },
    /// Scrape, then validate everything found
    Auto {
        #[command(flatten)]
        sources: SourceArgs,
        #[command(flatten)]
        check: CheckArgs,
    },
    /// List fresh working proxies from the cache
    Cached {
        /// Only proxies supporting this protocol (http, https, socks4, socks5)
        #[arg(short, long)]
        protocol: Option<ProxyType>,
        /// Only proxies of this anonymity (elite, anonymous, transparent, unknown)
        #[arg(short, long)]
        anonymity: Option<Anonymity>,
        /// Freshness window in hours (overrides CACHE_MAX_AGE_HOURS)
        #[arg(long)]
        max_age_hours: Option<u64>,
        /// Write proxies to this file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove cache entries not checked recently
    Sweep {
        /// Age threshold in days (overrides SWEEP_DAYS)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Manage registered sources
    Sources {
        #[command(subcommand)]
        command: SourceCommands,
    },
    /// Show recent runs
    History {
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Register source URLs
    Add {
        urls: Vec<String>,
        /// File containing source URLs, one per line
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },
    /// List registered sources
    List {
        /// Include deactivated sources
        #[arg(long)]
        all: bool,
    },
    /// Stop using a source
    Remove { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, uses_tui(&cli.command));

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(database) = &cli.database {
        config.database_url = database.clone();
    }

    let store = ProxyStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    let result = run(cli.command, config, store.clone()).await;
    store.close().await;
    result
}

fn uses_tui(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Check { check, .. } | Commands::Auto { check, .. } if check.tui
    )
}

/// Log to stderr; quiet while the monitor owns the terminal
fn init_tracing(verbose: bool, tui: bool) {
    let default = match (tui, verbose) {
        (true, _) => "error",
        (false, true) => "debug,sqlx=warn",
        (false, false) => "info,sqlx=warn",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(command: Commands, config: Config, store: ProxyStore) -> Result<()> {
    match command {
        Commands::Scrape { sources, output } => {
            let sources_list = collect_sources(&sources, &store).await?;
            let pipeline = build_pipeline(&config, Some(&sources), None, store)?;
            let extraction = pipeline.scrape(&sources_list, sources.limit, &LogProgress).await;

            print_extraction(&extraction);
            match output {
                Some(path) => {
                    ProxyParser::save_to_file(&extraction.candidates, &path)?;
                    println!("Saved {} candidates to {:?}", extraction.candidates.len(), path);
                }
                None => {
                    for candidate in &extraction.candidates {
                        println!("{}", candidate);
                    }
                }
            }
        }
        Commands::Check { input, check } => {
            let candidates = ProxyParser::parse_file(&input)
                .with_context(|| format!("Failed to read {:?}", input))?;
            println!("Loaded {} candidates from {:?}", candidates.len(), input);

            let pipeline = build_pipeline(&config, None, Some(&check), store)?;
            let report = if check.tui {
                match check_with_monitor(pipeline, candidates).await? {
                    Some(report) => report,
                    None => return interrupted(),
                }
            } else {
                pipeline.check(&candidates, &LogProgress).await
            };

            print_report(&report);
            save_report(&report, check.output.as_ref())?;
        }
        Commands::Auto { sources, check } => {
            let sources_list = collect_sources(&sources, &store).await?;
            let pipeline = build_pipeline(&config, Some(&sources), Some(&check), store)?;

            let (extraction, report) = if check.tui {
                match auto_with_monitor(pipeline, sources_list, sources.limit).await? {
                    Some(outcome) => outcome,
                    None => return interrupted(),
                }
            } else {
                pipeline.auto(&sources_list, sources.limit, &LogProgress).await
            };

            print_extraction(&extraction);
            print_report(&report);
            save_report(&report, check.output.as_ref())?;
        }
        Commands::Cached {
            protocol,
            anonymity,
            max_age_hours,
            output,
        } => {
            let max_age = max_age_hours
                .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
                .unwrap_or(config.cache_max_age);
            let entries = store.query(protocol, anonymity, max_age).await?;

            match output {
                Some(path) => {
                    let lines: Vec<&str> = entries.iter().map(|e| e.proxy.as_str()).collect();
                    std::fs::write(&path, lines.join("\n"))?;
                    println!("Saved {} cached proxies to {:?}", entries.len(), path);
                }
                None if entries.is_empty() => println!("No fresh proxies in the cache."),
                None => {
                    for entry in &entries {
                        let time = entry
                            .response_time
                            .map_or("-".to_string(), |t| format!("{}ms", t.as_millis()));
                        println!(
                            "{:<22} {:<24} {:<12} {:>8} {:<3} {}/{}",
                            entry.proxy,
                            entry.protocol_list(),
                            entry.anonymity,
                            time,
                            entry.country.as_deref().unwrap_or("--"),
                            entry.success_count,
                            entry.check_count
                        );
                    }
                }
            }
        }
        Commands::Sweep { days } => {
            let days = days.unwrap_or(config.sweep_days);
            let removed = store.sweep(days).await?;
            println!("Removed {} entries older than {} days", removed, days);
        }
        Commands::Sources { command } => match command {
            SourceCommands::Add { urls, file } => {
                let mut sources: Vec<Source> = urls.iter().map(|u| Source::new(u)).collect();
                if let Some(path) = file {
                    sources.extend(Source::load_file(&path)?);
                }
                if sources.is_empty() {
                    bail!("No source URLs given");
                }
                let added = store.import_sources(&sources).await?;
                println!("Registered {} new sources ({} already known)", added, sources.len() as u64 - added);
            }
            SourceCommands::List { all } => {
                let sources = if all {
                    store.all_sources().await?
                } else {
                    store.active_sources().await?
                };
                if sources.is_empty() {
                    println!("No sources registered.");
                }
                for source in sources {
                    let status = if source.is_active { "✓" } else { "○" };
                    let last_used = source
                        .last_used
                        .map_or("never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
                    println!(
                        "{} {}  used {}x, last {} proxies, {}",
                        status, source.uri, source.times_used, source.last_proxy_count, last_used
                    );
                }
            }
            SourceCommands::Remove { url } => {
                if store.deactivate_source(&url).await? {
                    println!("Source deactivated: {}", url);
                } else {
                    eprintln!("Source not found: {}", url);
                }
            }
        },
        Commands::History { limit } => {
            println!("Recent scrapes:");
            for run in store.recent_scrapes(limit).await? {
                let limit = run.limit.map_or(String::new(), |n| format!(" (limit {})", n));
                println!(
                    "  {} {}  {} candidates{} from {} sources ({} failed) in {:.1}s",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.id,
                    run.candidates,
                    limit,
                    run.sources_total,
                    run.sources_failed,
                    run.duration.as_secs_f64()
                );
            }
            println!("Recent checks:");
            for run in store.recent_checks(limit).await? {
                let average = run
                    .average_response_time
                    .map_or("-".to_string(), |t| format!("{}ms", t.as_millis()));
                println!(
                    "  {} {}  {}: {}/{} working ({:.1}%) in {:.1}s, avg {}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.id,
                    run.mode,
                    run.working,
                    run.checked,
                    run.success_rate,
                    run.duration.as_secs_f64(),
                    average
                );
                println!(
                    "      http {} https {} socks4 {} socks5 {} | elite {} anonymous {} transparent {}",
                    run.http, run.https, run.socks4, run.socks5, run.elite, run.anonymous, run.transparent
                );
            }
        }
    }

    Ok(())
}

fn build_pipeline(
    config: &Config,
    sources: Option<&SourceArgs>,
    check: Option<&CheckArgs>,
    store: ProxyStore,
) -> Result<Pipeline> {
    let mut crawler_config = config.crawler.clone();
    if let Some(fetches) = sources.and_then(|s| s.fetch_concurrency) {
        crawler_config = crawler_config.with_max_concurrent_fetches(fetches.max(1));
    }

    let mut checker_config = config.checker.clone();
    if let Some(check) = check {
        checker_config = checker_config
            .with_mode(check.mode)
            .with_include_socks(check.include_socks);
        if let Some(concurrency) = check.concurrency {
            checker_config = checker_config.with_concurrency(concurrency);
        }
        if let Some(timeout) = check.timeout {
            let timeout = Duration::try_from_secs_f64(timeout).context("Invalid timeout")?;
            checker_config = checker_config.with_timeout(timeout);
        }
        if let Some(batch_size) = check.batch_size {
            checker_config = checker_config.with_batch_size(batch_size);
        }
        if let Some(mmdb) = &check.mmdb {
            checker_config = checker_config.with_mmdb_path(mmdb.clone());
        }
    }

    let crawler = ProxyCrawler::with_config(crawler_config)?;
    let checker = ProxyChecker::with_config(checker_config)?;
    Ok(Pipeline::new(crawler, checker, store))
}

/// Well-known public proxy lists for `--common-sources`
const COMMON_SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt",
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/http.txt",
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=10000&country=all",
];

async fn collect_sources(args: &SourceArgs, store: &ProxyStore) -> Result<Vec<Source>> {
    let mut sources: Vec<Source> = args.sources.iter().map(|u| Source::new(u)).collect();

    if let Some(path) = &args.source_file {
        sources.extend(
            Source::load_file(path).with_context(|| format!("Failed to read {:?}", path))?,
        );
    }
    if args.from_db {
        sources.extend(store.active_sources().await?);
    }
    if args.common_sources {
        sources.extend(COMMON_SOURCES.iter().map(|uri| Source::new(uri)));
    }

    let mut seen = std::collections::HashSet::new();
    sources.retain(|s| seen.insert(s.uri.clone()));

    if sources.is_empty() {
        bail!("No sources given; use --source, --source-file, --from-db or --common-sources");
    }
    Ok(sources)
}

async fn check_with_monitor(pipeline: Pipeline, candidates: CandidateSet) -> Result<Option<CheckReport>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move { pipeline.check(&candidates, &tx).await });
    ProgressMonitor::new("Proxy Sieve - check").run(rx, task).await
}

async fn auto_with_monitor(
    pipeline: Pipeline,
    sources: Vec<Source>,
    limit: Option<usize>,
) -> Result<Option<(Extraction, CheckReport)>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move { pipeline.auto(&sources, limit, &tx).await });
    ProgressMonitor::new("Proxy Sieve - scrape and check").run(rx, task).await
}

fn interrupted() -> Result<()> {
    eprintln!("Interrupted before the run finished; nothing was saved.");
    Ok(())
}

fn print_extraction(extraction: &Extraction) {
    for outcome in &extraction.outcomes {
        match &outcome.error {
            None => eprintln!("Found {} candidates from {}", outcome.candidates, outcome.uri),
            Some(error) => eprintln!("Error scraping {}: {}", outcome.uri, error),
        }
    }
    eprintln!(
        "Total unique candidates: {} ({:.1}s)",
        extraction.candidates.len(),
        extraction.elapsed.as_secs_f64()
    );
}

fn print_report(report: &CheckReport) {
    println!(
        "\nChecked {} candidates in {:.1}s: {} working ({:.1}%)",
        report.checked,
        report.elapsed.as_secs_f64(),
        report.working,
        report.success_rate()
    );
    for (category, bucket) in report.categories.iter() {
        if category != Category::AllWorking {
            println!("  {:<12} {}", category.name(), bucket.len());
        }
    }
    if let Some(avg) = report.categories.average_response_time() {
        println!("  average response {}ms", avg.as_millis());
    }

    let fastest = report.categories.working();
    if !fastest.is_empty() {
        println!("\nFastest proxies:");
        for result in fastest.iter().take(10) {
            let time = result.response_time_ms().unwrap_or_default();
            let country = result.country.as_deref().unwrap_or("--");
            println!(
                "  {:<22} {:<20} {:<12} {:>6}ms {}",
                result.proxy,
                result.protocol_list(),
                result.anonymity,
                time,
                country
            );
        }
    }
}

fn save_report(report: &CheckReport, output: Option<&PathBuf>) -> Result<()> {
    if let Some(dir) = output {
        let written = ProxyParser::save_results(&report.categories, dir)?;
        println!("Saved {} result files to {:?}", written.len(), dir);
    }
    Ok(())
}
