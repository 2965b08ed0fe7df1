//! Sharded, thread-safe CSV output.
//!
//! Every enabled table gets `shard_count` files named `<table>_NNN.csv`, each
//! behind its own lock. A record's rows are serialized into a worker-local
//! buffer first and reach the shard in a single `write_all`, so a lock is held
//! for one copy and rows of different articles never interleave.

use crate::config::{OutputConfig, ShardBy, Table, WRITER_BUFFER_SIZE};
use crate::models::{CharIndex, Namespace, RenderedArticle};
use crate::pool::{WorkerId, WorkerLocal};
use crate::stats::PipelineStats;
use crate::title::normalize_title;
use anyhow::{bail, Context, Result};
use rustc_hash::FxHasher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

pub type ShardWriter = Box<dyn Write + Send>;

#[derive(Serialize)]
struct PageRow<'a> {
    id: &'a str,
    title: &'a str,
    text: &'a str,
    disambiguation: bool,
    categories: String,
}

#[derive(Serialize)]
struct LinkRow<'a> {
    id: &'a str,
    start: usize,
    end: usize,
    surface: &'a str,
    target: String,
}

#[derive(Serialize)]
struct RedirectRow<'a> {
    id: &'a str,
    title: &'a str,
    target: &'a str,
}

pub struct ShardedSink {
    shards: BTreeMap<Table, Vec<Mutex<ShardWriter>>>,
    shard_count: u32,
    shard_by: ShardBy,
    include_other_namespaces: bool,
    scratch: WorkerLocal<Vec<u8>>,
    stats: Arc<PipelineStats>,
}

impl ShardedSink {
    /// Creates every shard file and writes its header. Any failure here is fatal.
    pub fn create(config: &OutputConfig, slots: usize, stats: Arc<PipelineStats>) -> Result<Self> {
        if config.shard_count == 0 {
            bail!("Shard count must be at least 1");
        }

        if !config.dry_run {
            fs::create_dir_all(&config.output_dir).with_context(|| {
                format!("Failed to create output directory: {}", config.output_dir)
            })?;
        }

        let mut writers = BTreeMap::new();
        for &table in &config.tables {
            let mut shards: Vec<ShardWriter> = Vec::with_capacity(config.shard_count as usize);
            for shard in 0..config.shard_count {
                if config.dry_run {
                    shards.push(Box::new(io::sink()));
                    continue;
                }
                let path = shard_path(&config.output_dir, table, shard);
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create shard file: {}", path.display()))?;
                shards.push(Box::new(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file)));
            }
            writers.insert(table, shards);
        }

        debug!(
            dir = %config.output_dir,
            shards = config.shard_count,
            tables = writers.len(),
            dry_run = config.dry_run,
            "Output shards created"
        );
        Self::from_writers(config, writers, slots, stats)
    }

    /// Builds a sink over caller-supplied writers, one vector per table.
    pub fn from_writers(
        config: &OutputConfig,
        writers: BTreeMap<Table, Vec<ShardWriter>>,
        slots: usize,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        let mut shards = BTreeMap::new();
        for (table, table_writers) in writers {
            if table_writers.len() != config.shard_count as usize {
                bail!(
                    "Table {} has {} writers, expected {}",
                    table.name(),
                    table_writers.len(),
                    config.shard_count
                );
            }
            let header = header_bytes(table)?;
            let mut locked = Vec::with_capacity(table_writers.len());
            for mut writer in table_writers {
                writer
                    .write_all(&header)
                    .with_context(|| format!("Failed to write {} header", table.name()))?;
                locked.push(Mutex::new(writer));
            }
            shards.insert(table, locked);
        }

        Ok(Self {
            shards,
            shard_count: config.shard_count,
            shard_by: config.shard_by,
            include_other_namespaces: config.include_other_namespaces,
            scratch: WorkerLocal::new(slots),
            stats,
        })
    }

    pub fn shard_for(&self, article_id: &str, ordinal: u64) -> usize {
        let n = u64::from(self.shard_count);
        let key = match self.shard_by {
            ShardBy::Ordinal => ordinal,
            ShardBy::ArticleId => {
                let mut hasher = FxHasher::default();
                article_id.hash(&mut hasher);
                hasher.finish()
            }
        };
        (key % n) as usize
    }

    /// Writes the rows of one article. Failures are logged and counted, never retried.
    pub fn write(&self, article: &RenderedArticle, ordinal: u64, worker: WorkerId) {
        let shard = self.shard_for(&article.id, ordinal);

        if article.meta.is_redirect {
            if let Some(target) = article.meta.redirect_target.as_deref() {
                let row = RedirectRow {
                    id: &article.id,
                    title: &article.title,
                    target,
                };
                self.write_unit(Table::Redirects, shard, worker, &article.id, |w| {
                    w.serialize(&row).map(|_| 1)
                });
            }
            return;
        }

        if article.namespace == Namespace::Other && !self.include_other_namespaces {
            return;
        }

        let page = PageRow {
            id: &article.id,
            title: &article.title,
            text: &article.text,
            disambiguation: article.meta.is_disambiguation,
            categories: format_categories(&article.meta.categories),
        };
        self.write_unit(Table::Pages, shard, worker, &article.id, |w| {
            w.serialize(&page).map(|_| 1)
        });

        if article.links.is_empty() {
            return;
        }
        let index = CharIndex::new(&article.text);
        self.write_unit(Table::Links, shard, worker, &article.id, |w| {
            for link in &article.links {
                w.serialize(LinkRow {
                    id: &article.id,
                    start: link.start,
                    end: link.end,
                    surface: index.slice(link.start, link.end),
                    target: normalize_title(&link.target),
                })?;
            }
            Ok(article.links.len() as u64)
        });
    }

    /// Serializes rows into the worker's scratch buffer, then copies them to the shard.
    fn write_unit<F>(&self, table: Table, shard: usize, worker: WorkerId, id: &str, rows: F)
    where
        F: FnOnce(&mut csv::Writer<&mut Vec<u8>>) -> csv::Result<u64>,
    {
        let Some(shards) = self.shards.get(&table) else {
            return;
        };

        let result = self.scratch.with(worker, Vec::new, |buf| {
            buf.clear();
            let count = {
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(&mut *buf);
                let count = rows(&mut writer)?;
                writer.flush()?;
                count
            };
            let mut out = shards[shard].lock().unwrap_or_else(PoisonError::into_inner);
            out.write_all(buf.as_slice())?;
            Ok::<u64, anyhow::Error>(count)
        });

        match result {
            Ok(count) => self.stats.add_rows(count),
            Err(e) => {
                self.stats.inc_write_errors();
                error!(id, table = table.name(), shard, error = %e, "Failed to write rows");
            }
        }
    }

    /// Flushes every shard. The first flush failure is returned after all are attempted.
    pub fn close(&self) -> Result<()> {
        let mut first_error = None;
        for (table, shards) in &self.shards {
            for (shard, writer) in shards.iter().enumerate() {
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = writer.flush() {
                    error!(table = table.name(), shard, error = %e, "Failed to flush shard");
                    first_error.get_or_insert_with(|| {
                        anyhow::Error::new(e)
                            .context(format!("Failed to flush {} shard {}", table.name(), shard))
                    });
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub fn shard_path(output_dir: &str, table: Table, shard: u32) -> PathBuf {
    Path::new(output_dir).join(format!("{}_{:03}.csv", table.name(), shard))
}

fn header_bytes(table: Table) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.header())?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to build {} header: {}", table.name(), e))
}

/// `{"A","B"}`; quotes and backslashes inside names are backslash-escaped.
pub fn format_categories(categories: &[String]) -> String {
    let mut out = String::from("{");
    for (i, category) in categories.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        for c in category.chars() {
            if c == '"' || c == '\\' {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('"');
    }
    out.push('}');
    out
}
