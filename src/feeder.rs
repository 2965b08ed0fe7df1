//! Single-threaded driver that feeds records into the worker pool.

use crate::annotate::{annotate, minimal};
use crate::classify::is_redirect;
use crate::config::{ConvertOptions, PipelineConfig, PROGRESS_INTERVAL};
use crate::models::{ArticleRecord, RenderedArticle};
use crate::pool::{panic_message, WorkerId, WorkerPool};
use crate::render::Renderer;
use crate::sink::ShardedSink;
use crate::source::RecordSource;
use crate::stats::PipelineStats;
use crate::title::is_special_title;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Everything a worker needs to turn a record into rows.
pub struct TaskContext {
    renderer: Arc<dyn Renderer>,
    sink: Arc<ShardedSink>,
    stats: Arc<PipelineStats>,
    convert: ConvertOptions,
}

impl TaskContext {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        sink: Arc<ShardedSink>,
        stats: Arc<PipelineStats>,
        convert: ConvertOptions,
    ) -> Self {
        Self {
            renderer,
            sink,
            stats,
            convert,
        }
    }

    /// Renders, classifies and writes one article. A failing article is logged and dropped.
    pub fn process(&self, record: ArticleRecord, ordinal: u64, worker: WorkerId) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            annotate(&record, self.renderer.as_ref(), self.convert)
        }));
        match outcome {
            Ok(Ok(article)) => {
                self.stats.inc_rendered();
                self.count(&article);
                self.sink.write(&article, ordinal, worker);
            }
            Ok(Err(e)) => {
                self.stats.inc_failures();
                error!(id = %record.id, error = %format!("{:#}", e), "Failed to annotate article");
            }
            Err(payload) => {
                self.stats.inc_failures();
                error!(
                    id = %record.id,
                    panic = %panic_message(payload.as_ref()),
                    "Article annotation panicked"
                );
            }
        }
    }

    /// Writes the metadata-only form of a record that is never rendered.
    pub fn emit_minimal(&self, record: &ArticleRecord, ordinal: u64) {
        let article = minimal(record);
        self.stats.inc_minimal();
        self.count(&article);
        self.sink.write(&article, ordinal, WorkerId::Caller);
    }

    fn count(&self, article: &RenderedArticle) {
        let meta = &article.meta;
        if meta.is_redirect {
            self.stats.inc_redirects();
        }
        if meta.is_disambiguation {
            self.stats.inc_disambiguations();
        }
        if meta.is_stub {
            self.stats.inc_stubs();
        }
        self.stats.add_links(article.links.len() as u64);
        self.stats.add_categories(meta.categories.len() as u64);
    }
}

/// Whether a record goes through the renderer.
pub fn is_admitted(record: &ArticleRecord) -> bool {
    let text = record.text();
    record.is_main_namespace
        && !text.is_empty()
        && !is_special_title(&record.title)
        && !is_redirect(text)
}

pub struct DumpFeeder {
    pool: WorkerPool,
    context: Arc<TaskContext>,
    sink: Arc<ShardedSink>,
    stats: Arc<PipelineStats>,
    progress: ProgressBar,
    limit: Option<u64>,
    next_ordinal: u64,
    started: Instant,
}

impl DumpFeeder {
    /// Starts the pool and creates the output shards.
    pub fn new(config: &PipelineConfig, renderer: Arc<dyn Renderer>) -> Result<Self> {
        let pool = WorkerPool::new(&config.pool)?;
        let stats = Arc::new(PipelineStats::new());
        let sink = Arc::new(
            ShardedSink::create(&config.output, pool.slot_count(), Arc::clone(&stats))
                .context("Failed to create output shards")?,
        );
        let context = Arc::new(TaskContext::new(
            renderer,
            Arc::clone(&sink),
            Arc::clone(&stats),
            config.convert,
        ));
        let progress = if config.show_progress {
            make_spinner()
        } else {
            ProgressBar::hidden()
        };

        info!(
            workers = pool.workers(),
            queue = pool.capacity(),
            shards = config.output.shard_count,
            "Pipeline started"
        );
        Ok(Self {
            pool,
            context,
            sink,
            stats,
            progress,
            limit: config.limit,
            next_ordinal: 0,
            started: Instant::now(),
        })
    }

    /// Routes one record: rendered on the pool, or written as a minimal page right here.
    pub fn feed(&mut self, record: ArticleRecord) -> ControlFlow<()> {
        if self.limit.is_some_and(|limit| self.next_ordinal >= limit) {
            return ControlFlow::Break(());
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.stats.inc_seen();

        if !is_admitted(&record) {
            self.context.emit_minimal(&record, ordinal);
            return ControlFlow::Continue(());
        }

        let context = Arc::clone(&self.context);
        self.pool
            .execute(move |worker| context.process(record, ordinal, worker));
        self.stats.inc_submitted();

        let submitted = self.stats.submitted();
        if submitted % PROGRESS_INTERVAL == 0 {
            self.report(submitted);
        }
        ControlFlow::Continue(())
    }

    fn report(&self, submitted: u64) {
        let elapsed = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        let rate = submitted as f64 / elapsed;
        info!("{} pages at {:.2}/sec", submitted, rate);
        info!(
            active = self.pool.active(),
            queued = self.pool.queued(),
            "Active threads"
        );
        self.progress
            .set_message(format!("{} pages at {:.2}/sec", submitted, rate));
    }

    /// Drains the pool, then flushes every shard.
    pub fn finish(self) -> Result<Arc<PipelineStats>> {
        let Self {
            pool,
            context,
            sink,
            stats,
            progress,
            started,
            ..
        } = self;

        stats.set_caller_runs(pool.caller_runs());
        pool.shutdown();
        drop(context);
        progress.finish_and_clear();

        sink.close()?;
        info!(
            seen = stats.seen(),
            rendered = stats.rendered(),
            failures = stats.failures(),
            duration_secs = started.elapsed().as_secs_f64(),
            "Pipeline finished"
        );
        Ok(stats)
    }
}

/// Feeds every record of `source` through the pipeline and waits for the output to land.
pub fn run_pipeline(
    source: &mut dyn RecordSource,
    config: &PipelineConfig,
    renderer: Arc<dyn Renderer>,
) -> Result<Arc<PipelineStats>> {
    let mut feeder = DumpFeeder::new(config, renderer)?;
    let fed = source.for_each_record(&mut |record: ArticleRecord| -> Result<ControlFlow<()>> {
        Ok(feeder.feed(record))
    });
    // drain what was submitted even when the source failed midway
    let finished = feeder.finish();
    fed.context("Failed to read records")?;
    finished
}

fn make_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Annotating...");
    pb
}
