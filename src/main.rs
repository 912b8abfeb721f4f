use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wiki_mention_extractor::dump::open_dump;
use wiki_mention_extractor::{
    ArticleJob, BatchRunner, ContextWindower, EntityResolver, ExtractConfig, MarkupScanner,
    OutputSinks, ParallelConfig, Stats, WikipediaLookup, WindowPolicy,
};

#[derive(Parser)]
#[command(name = "wiki-mention-extractor")]
#[command(about = "Extract redirects, anchors and context-windowed entity mentions from a wiki dump")]
struct Args {
    /// Wikipedia dump file (.xml or .xml.bz2)
    wiki: PathBuf,

    /// File where anchor information should be saved (TSV)
    out_anchors: PathBuf,

    /// File where redirection information should be saved (TSV)
    out_redirections: PathBuf,

    /// File where mentions should be saved (JSON)
    out_mentions: PathBuf,

    /// Number of worker threads (0 = auto-detect)
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Articles per batch
    #[arg(long, default_value_t = 10000)]
    max_jobs: usize,

    /// Context window policy
    #[arg(long, value_enum, default_value_t = WindowPolicy::Character)]
    window: WindowPolicy,

    /// Look for mentions in infoboxes and external-links sections too
    #[arg(long)]
    keep_noise: bool,

    /// Stop after this many articles
    #[arg(long)]
    page_limit: Option<usize>,

    /// YAML file overriding redirect keywords and lookup endpoint
    #[arg(long)]
    config: Option<PathBuf>,

    /// Quiet mode - warnings only, no progress
    #[arg(short, long)]
    quiet: bool,
}

fn print_stats(stats: &Stats, cached_entities: usize) {
    println!();
    println!("============================================================");
    println!("Articles processed: {}", stats.articles_processed);
    println!("Batches: {}", stats.batches);
    println!("Redirect rows: {}", stats.redirects_written);
    println!("Anchor rows: {}", stats.anchors_written);
    println!("Mentions: {}", stats.mentions_written);
    println!("------------------------------------------------------------");
    println!("Namespaced articles: {}", stats.namespaced);
    println!("Failed jobs: {}", stats.failed_jobs);
    println!("Resolved entities cached: {}", cached_entities);
    println!("Rate: {:.0} articles/sec", stats.articles_processed as f64 / stats.elapsed.as_secs_f64().max(1e-9));
    println!("============================================================");
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ExtractConfig::load_or_default(args.config.as_deref())
        .context("loading configuration")?;
    if args.max_jobs == 0 {
        anyhow::bail!("--max-jobs must be at least 1");
    }

    let mut parallel = ParallelConfig::default();
    if args.threads > 0 {
        parallel.num_threads = args.threads;
    }
    parallel.batch_size = args.max_jobs;

    let scanner = MarkupScanner::new(&config.redirect_keywords)
        .context("compiling redirect keyword pattern")?;
    let resolver = EntityResolver::new(
        Box::new(WikipediaLookup::new(&config)),
        config.wiki_url_base.clone(),
    );
    let job = ArticleJob {
        scanner: &scanner,
        windower: ContextWindower::new(args.window),
        resolver: &resolver,
        strip_noise: !args.keep_noise,
    };

    info!(
        dump = %args.wiki.display(),
        threads = parallel.num_threads,
        batch_size = parallel.batch_size,
        window = ?args.window,
        "starting extraction"
    );

    let articles = open_dump(&args.wiki)?;
    let sinks = OutputSinks::create(&args.out_redirections, &args.out_anchors, &args.out_mentions)?;

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(200));
        pb
    };

    let mut runner = BatchRunner::new(job, parallel, sinks).with_progress(progress.clone());
    let stats = match args.page_limit {
        Some(limit) => runner.run_fallible(articles.take(limit)),
        None => runner.run_fallible(articles),
    }
    .context("extraction aborted")?;
    progress.finish_and_clear();

    if !args.quiet {
        print_stats(&stats, resolver.cached_len());
    }
    println!("{:.3}s elapsed.", stats.elapsed.as_secs_f64());

    Ok(())
}
