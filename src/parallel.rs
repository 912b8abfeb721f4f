//! Batch-parallel dispatch of article jobs and ownership of the output files.
//!
//! Articles are grouped into batches; each batch is split across a fixed
//! number of std threads, joined, and written out before the next batch is
//! read. Mentions accumulate in memory and are written once at the end.

use crate::error::{ExtractError, Result, SinkKind};
use crate::job::{Article, ArticleJob, ArticleResult, Mention};
use crate::markup::is_namespaced;

use indicatif::ProgressBar;
use std::any::Any;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads per batch
    pub num_threads: usize,
    /// Articles per batch
    pub batch_size: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self {
            num_threads: cpus,
            batch_size: 10000,
        }
    }
}

/// The three output files, owned by the runner for the whole run.
pub struct OutputSinks<W: Write> {
    pub redirects: W,
    pub anchors: W,
    pub mentions: W,
}

impl OutputSinks<BufWriter<File>> {
    pub fn create(redirects: &Path, anchors: &Path, mentions: &Path) -> Result<Self> {
        let open = |sink: SinkKind, path: &Path| {
            File::create(path)
                .map(|f| BufWriter::with_capacity(256 * 1024, f))
                .map_err(|source| ExtractError::SinkOpen {
                    sink,
                    path: path.to_path_buf(),
                    source,
                })
        };
        Ok(OutputSinks {
            redirects: open(SinkKind::Redirects, redirects)?,
            anchors: open(SinkKind::Anchors, anchors)?,
            mentions: open(SinkKind::Mentions, mentions)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub articles_processed: usize,
    pub batches: usize,
    pub redirects_written: usize,
    pub anchors_written: usize,
    pub mentions_written: usize,
    pub namespaced: usize,
    pub failed_jobs: usize,
    pub elapsed: Duration,
}

pub struct BatchRunner<'a, W: Write> {
    job: ArticleJob<'a>,
    config: ParallelConfig,
    sinks: OutputSinks<W>,
    mentions: BTreeMap<String, Mention>,
    stats: Stats,
    progress: ProgressBar,
}

impl<'a, W: Write> BatchRunner<'a, W> {
    pub fn new(job: ArticleJob<'a>, config: ParallelConfig, sinks: OutputSinks<W>) -> Self {
        BatchRunner {
            job,
            config,
            sinks,
            mentions: BTreeMap::new(),
            stats: Stats::default(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Process every article, then write the mentions map.
    pub fn run_all(&mut self, articles: impl IntoIterator<Item = Article>) -> Result<Stats> {
        self.run_fallible(articles.into_iter().map(Ok))
    }

    /// Like [`run_all`](Self::run_all) for a source that can fail mid-stream;
    /// a read error aborts the run.
    pub fn run_fallible<I>(&mut self, articles: I) -> Result<Stats>
    where
        I: IntoIterator<Item = io::Result<Article>>,
    {
        let start_time = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let mut batch: Vec<Article> = Vec::with_capacity(batch_size);

        for article in articles {
            batch.push(article.map_err(ExtractError::DumpRead)?);
            if batch.len() >= batch_size {
                self.flush_batch(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            self.flush_batch(&batch)?;
        }

        self.write_mentions()?;
        self.stats.elapsed = start_time.elapsed();
        Ok(self.stats.clone())
    }

    pub fn into_sinks(self) -> OutputSinks<W> {
        self.sinks
    }

    fn flush_batch(&mut self, batch: &[Article]) -> Result<()> {
        self.stats.batches += 1;
        let batch_no = self.stats.batches;
        let results = process_batch_threaded(&self.job, batch, self.config.num_threads);

        for result in results {
            self.write_result(result, batch_no)?;
        }
        self.sinks
            .redirects
            .flush()
            .map_err(sink_error(SinkKind::Redirects, batch_no))?;
        self.sinks
            .anchors
            .flush()
            .map_err(sink_error(SinkKind::Anchors, batch_no))?;

        debug!(
            batch = batch_no,
            articles = batch.len(),
            mentions_so_far = self.mentions.len(),
            "batch flushed"
        );
        self.progress.set_message(format!(
            "Batches: {} | Articles: {} | Anchors: {} | Mentions: {}",
            self.stats.batches,
            self.stats.articles_processed,
            self.stats.anchors_written,
            self.mentions.len()
        ));
        self.progress.tick();
        Ok(())
    }

    fn write_result(&mut self, result: ArticleResult, batch_no: usize) -> Result<()> {
        let name = &result.article_name;
        self.stats.articles_processed += 1;
        if result.failed {
            // No rows at all, not even the identity anchor
            self.stats.failed_jobs += 1;
            return Ok(());
        }

        for redirect in &result.redirects {
            writeln!(self.sinks.redirects, "{}\t{}", name, redirect.target_title)
                .map_err(sink_error(SinkKind::Redirects, batch_no))?;
            self.stats.redirects_written += 1;
        }

        if is_namespaced(name) {
            self.stats.namespaced += 1;
            return Ok(());
        }

        writeln!(self.sinks.anchors, "{0}\t{0}\t{0}", name)
            .map_err(sink_error(SinkKind::Anchors, batch_no))?;
        for anchor in &result.anchors {
            writeln!(
                self.sinks.anchors,
                "{}\t{}\t{}",
                name, anchor.anchor_text, anchor.target_title
            )
            .map_err(sink_error(SinkKind::Anchors, batch_no))?;
        }
        self.stats.anchors_written += result.anchors.len() + 1;

        self.mentions.extend(result.mentions);
        Ok(())
    }

    fn write_mentions(&mut self) -> Result<()> {
        let batch_no = self.stats.batches;
        serde_json::to_writer(&mut self.sinks.mentions, &self.mentions).map_err(|e| {
            if e.is_io() {
                ExtractError::Sink {
                    sink: SinkKind::Mentions,
                    batch: batch_no,
                    source: e.into(),
                }
            } else {
                ExtractError::MentionsJson(e)
            }
        })?;
        self.sinks
            .mentions
            .flush()
            .map_err(sink_error(SinkKind::Mentions, batch_no))?;

        self.stats.mentions_written = self.mentions.len();
        info!(mentions = self.mentions.len(), "mentions written");
        Ok(())
    }
}

fn sink_error(sink: SinkKind, batch: usize) -> impl FnOnce(io::Error) -> ExtractError {
    move |source| ExtractError::Sink { sink, batch, source }
}

/// Run one batch across `num_threads` scoped threads, keeping input order.
fn process_batch_threaded(
    job: &ArticleJob<'_>,
    batch: &[Article],
    num_threads: usize,
) -> Vec<ArticleResult> {
    if batch.is_empty() {
        return vec![];
    }

    let num_threads = num_threads.min(batch.len()).max(1);
    let chunk_size = (batch.len() + num_threads - 1) / num_threads;

    thread::scope(|scope| {
        let handles: Vec<_> = batch
            .chunks(chunk_size)
            .map(|chunk| {
                let handle = scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|article| run_isolated(job, article))
                        .collect::<Vec<_>>()
                });
                (handle, chunk)
            })
            .collect();

        let mut results = Vec::with_capacity(batch.len());
        for (handle, chunk) in handles {
            match handle.join() {
                Ok(chunk_results) => results.extend(chunk_results),
                Err(_) => {
                    warn!(articles = chunk.len(), "worker thread died; chunk emitted empty");
                    results.extend(chunk.iter().map(|a| ArticleResult::failed(a.name.as_str())));
                }
            }
        }
        results
    })
}

/// A panicking job degrades to an empty result instead of taking the batch down.
fn run_isolated(job: &ArticleJob<'_>, article: &Article) -> ArticleResult {
    match panic::catch_unwind(AssertUnwindSafe(|| job.run(article))) {
        Ok(result) => result,
        Err(payload) => {
            warn!(
                article = %article.name,
                reason = panic_message(payload.as_ref()),
                "article job failed; emitting empty result"
            );
            ArticleResult::failed(article.name.as_str())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REDIRECT_KEYWORDS;
    use crate::context::{ContextWindower, WindowPolicy};
    use crate::error::LookupError;
    use crate::markup::MarkupScanner;
    use crate::resolver::tests::FakeLookup;
    use crate::resolver::{EntityLookup, EntityResolver, PageProps};
    use serde_json::Value;

    /// Memory sink that can be told to fail every write.
    #[derive(Default)]
    struct TestSink {
        buf: Vec<u8>,
        fail: bool,
    }

    impl TestSink {
        fn failing() -> Self {
            TestSink { buf: Vec::new(), fail: true }
        }

        fn text(&self) -> String {
            String::from_utf8(self.buf.clone()).unwrap()
        }
    }

    impl Write for TestSink {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sinks() -> OutputSinks<TestSink> {
        OutputSinks {
            redirects: TestSink::default(),
            anchors: TestSink::default(),
            mentions: TestSink::default(),
        }
    }

    fn zoo() -> FakeLookup {
        FakeLookup::default()
            .with_entity("Dog", "Q144", "4269567", "domesticated canid")
            .with_entity("mammal", "Q7377", "18838", "class of animals")
            .with_entity("Cat", "Q146", "6678", "small domesticated carnivore")
    }

    fn run_articles(
        lookup: Box<dyn EntityLookup>,
        articles: Vec<Article>,
        batch_size: usize,
        num_threads: usize,
        sinks: OutputSinks<TestSink>,
    ) -> (Result<Stats>, OutputSinks<TestSink>) {
        let scanner = MarkupScanner::new(&DEFAULT_REDIRECT_KEYWORDS).unwrap();
        let resolver = EntityResolver::new(lookup, "en.wikipedia.org/wiki/");
        let job = ArticleJob {
            scanner: &scanner,
            windower: ContextWindower::new(WindowPolicy::Character),
            resolver: &resolver,
            strip_noise: true,
        };
        let config = ParallelConfig { num_threads, batch_size };
        let mut runner = BatchRunner::new(job, config, sinks);
        let stats = runner.run_all(articles);
        (stats, runner.into_sinks())
    }

    #[test]
    fn dog_scenario_outputs() {
        let articles = vec![Article::new(
            "Dog",
            "The [[Dog|dog]] is a [[mammal]]. #REDIRECT [[Canine]]",
        )];
        let (stats, sinks) = run_articles(Box::new(zoo()), articles, 10, 2, sinks());
        let stats = stats.unwrap();

        assert_eq!(sinks.redirects.text(), "Dog\tCanine\n");
        assert_eq!(
            sinks.anchors.text(),
            "Dog\tDog\tDog\nDog\tdog\tDog\nDog\tmammal\tmammal\n"
        );

        let mentions: Value = serde_json::from_str(&sinks.mentions.text()).unwrap();
        let map = mentions.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["Dog_1"]["mention"], "dog");
        assert_eq!(map["Dog_2"]["mention"], "mammal");
        assert_eq!(map["Dog_2"]["wikipedia_id"], "Q7377");
        assert_eq!(map["Dog_1"]["article_id"], "Q144");

        assert_eq!(stats.articles_processed, 1);
        assert_eq!(stats.redirects_written, 1);
        assert_eq!(stats.anchors_written, 3);
        assert_eq!(stats.mentions_written, 2);
    }

    #[test]
    fn namespaced_article_only_contributes_redirects() {
        let articles = vec![
            Article::new("Category:Foo", "#REDIRECT [[Category:Bar]] and [[Dog]]"),
            Article::new("Template:Baz", "#REDIRECT [[Dog]]"),
        ];
        let (stats, sinks) = run_articles(Box::new(zoo()), articles, 10, 2, sinks());
        let stats = stats.unwrap();

        assert_eq!(sinks.redirects.text(), "Category:Foo\tCategory:Bar\nTemplate:Baz\tDog\n");
        assert_eq!(sinks.anchors.text(), "");
        assert_eq!(sinks.mentions.text(), "{}");
        assert_eq!(stats.namespaced, 2);
    }

    #[test]
    fn batches_preserve_submission_order() {
        let articles: Vec<Article> = (0..25)
            .map(|i| Article::new(format!("A{}", i), format!("#REDIRECT [[T{}]]", i)))
            .collect();
        let (stats, sinks) = run_articles(Box::new(zoo()), articles, 4, 3, sinks());
        let stats = stats.unwrap();

        let expected: String = (0..25).map(|i| format!("A{}\tT{}\n", i, i)).collect();
        assert_eq!(sinks.redirects.text(), expected);
        assert_eq!(stats.batches, 7);
        assert_eq!(stats.articles_processed, 25);
    }

    #[test]
    fn mentions_from_all_batches_are_merged() {
        let articles = vec![
            Article::new("Dog", "A [[mammal]]."),
            Article::new("Cat", "Also a [[mammal]], unlike [[Dog|dogs]]."),
            Article::new("Mouse", "Hunted by [[Cat|cats]]."),
        ];
        let (stats, sinks) = run_articles(Box::new(zoo()), articles, 1, 1, sinks());
        stats.unwrap();

        let mentions: Value = serde_json::from_str(&sinks.mentions.text()).unwrap();
        let mut keys: Vec<&String> = mentions.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["Cat_1", "Cat_2", "Dog_1", "Mouse_1"]);
        assert_eq!(mentions["Mouse_1"]["article_id"], "");
        assert_eq!(mentions["Cat_2"]["wikipedia_title"], "Dog");
    }

    /// Panics on one title to exercise job isolation.
    struct ExplodingLookup(FakeLookup);

    impl EntityLookup for ExplodingLookup {
        fn lookup(&self, normalized_title: &str) -> std::result::Result<Option<PageProps>, LookupError> {
            if normalized_title == "Boom" {
                panic!("lookup exploded for {}", normalized_title);
            }
            self.0.lookup(normalized_title)
        }
    }

    #[test]
    fn panicking_job_degrades_to_empty_result() {
        let articles = vec![
            Article::new("Dog", "A [[mammal]]."),
            Article::new("Boom", "#REDIRECT [[Kaboom]] and [[mammal]]"),
            Article::new("Cat", "A [[mammal]] too."),
        ];
        let lookup = Box::new(ExplodingLookup(zoo()));
        let (stats, sinks) = run_articles(lookup, articles, 10, 2, sinks());
        let stats = stats.unwrap();

        assert_eq!(stats.failed_jobs, 1);
        assert_eq!(stats.articles_processed, 3);
        // the failed article writes no rows of any kind
        assert_eq!(sinks.redirects.text(), "");
        assert_eq!(
            sinks.anchors.text(),
            "Dog\tDog\tDog\nDog\tmammal\tmammal\nCat\tCat\tCat\nCat\tmammal\tmammal\n"
        );
        assert!(!sinks.anchors.text().contains("Boom"));
        let mentions: Value = serde_json::from_str(&sinks.mentions.text()).unwrap();
        assert_eq!(mentions.as_object().unwrap().len(), 2);
    }

    #[test]
    fn sink_failure_names_sink_and_batch() {
        let articles = vec![
            Article::new("Category:Only", "#REDIRECT [[X]]"),
            Article::new("Dog", "A [[mammal]]."),
        ];
        let failing = OutputSinks {
            redirects: TestSink::default(),
            anchors: TestSink::failing(),
            mentions: TestSink::default(),
        };
        let (stats, _) = run_articles(Box::new(zoo()), articles, 1, 1, failing);

        match stats {
            Err(ExtractError::Sink { sink, batch, .. }) => {
                assert_eq!(sink, SinkKind::Anchors);
                assert_eq!(batch, 2);
            }
            other => panic!("expected sink error, got {:?}", other.map(|s| s.articles_processed)),
        }
    }

    #[test]
    fn mentions_sink_failure_is_fatal() {
        let failing = OutputSinks {
            redirects: TestSink::default(),
            anchors: TestSink::default(),
            mentions: TestSink::failing(),
        };
        let (stats, _) = run_articles(Box::new(zoo()), vec![Article::new("Dog", "x")], 5, 1, failing);
        assert!(matches!(
            stats,
            Err(ExtractError::Sink { sink: SinkKind::Mentions, batch: 1, .. })
        ));
    }

    #[test]
    fn read_error_aborts_run() {
        let scanner = MarkupScanner::new(&DEFAULT_REDIRECT_KEYWORDS).unwrap();
        let resolver = EntityResolver::new(Box::new(zoo()), "en.wikipedia.org/wiki/");
        let job = ArticleJob {
            scanner: &scanner,
            windower: ContextWindower::default(),
            resolver: &resolver,
            strip_noise: true,
        };
        let mut runner = BatchRunner::new(job, ParallelConfig::default(), sinks());
        let source = vec![
            Ok(Article::new("Dog", "x")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated dump")),
        ];
        assert!(matches!(runner.run_fallible(source), Err(ExtractError::DumpRead(_))));
    }

    #[test]
    fn empty_input_writes_empty_object() {
        let (stats, sinks) = run_articles(Box::new(zoo()), vec![], 10, 4, sinks());
        assert_eq!(stats.unwrap().batches, 0);
        assert_eq!(sinks.mentions.text(), "{}");
    }

    #[test]
    fn create_writes_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ["r.tsv", "a.tsv", "m.json"].map(|n| dir.path().join(n));
        let mut sinks = OutputSinks::create(&paths[0], &paths[1], &paths[2]).unwrap();
        writeln!(sinks.redirects, "Dog\tCanine").unwrap();
        drop(sinks);
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "Dog\tCanine\n");
    }

    #[test]
    fn create_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no/such/dir/m.json");
        let err = OutputSinks::create(&dir.path().join("r"), &dir.path().join("a"), &missing)
            .err()
            .unwrap();
        assert!(matches!(err, ExtractError::SinkOpen { sink: SinkKind::Mentions, .. }));
    }
}
