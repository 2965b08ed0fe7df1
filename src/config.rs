use std::collections::BTreeSet;

/// Progress update interval (report every N submitted articles)
pub const PROGRESS_INTERVAL: u64 = 500;

/// Maximum nesting of node lists the converter will visit
pub const RENDER_RECURSION_LIMIT: usize = 32;

/// Appended in place of a subtree nested deeper than the recursion limit
pub const RECURSION_ERROR_MARKER: &str = "[recursion limit exceeded]";

/// More worker threads than this do not help
pub const MAX_THREADS: usize = 80;

pub const MIN_THREADS: usize = 1;

pub const DEFAULT_CSV_SHARDS: u32 = 8;

/// Buffer size for shard writers
pub const WRITER_BUFFER_SIZE: usize = 128 * 1024;

/// Buffer size for merge operations
pub const MERGE_BUFFER_SIZE: usize = 256 * 1024;

/// Disambiguation template names; each also matches with a lowercase initial
pub const DISAMBIGUATION_TEMPLATES: &[&str] = &[
    "Disambig",
    "Disambiguation",
    "Dab",
    "DAB",
    "Disamb",
    "Hndis",
    "Geodis",
];

/// Options for the link-offset converter.
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    pub keep_section_titles: bool,
    pub recursion_limit: usize,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            keep_section_titles: false,
            recursion_limit: RENDER_RECURSION_LIMIT,
        }
    }
}

/// Worker pool sizing. `threads == Some(0)` runs every task on the submitting thread.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub threads: Option<usize>,
    pub min_threads: usize,
    pub max_threads: usize,
    pub queue_capacity: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: None,
            min_threads: MIN_THREADS,
            max_threads: MAX_THREADS,
            queue_capacity: None,
        }
    }
}

impl PoolConfig {
    pub fn inline() -> Self {
        Self {
            threads: Some(0),
            ..Self::default()
        }
    }

    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: Some(threads),
            ..Self::default()
        }
    }

    /// Half the available parallelism, clamped to `[min_threads, max_threads]` and never below 1.
    pub fn worker_count(&self) -> usize {
        if let Some(n) = self.threads {
            return n;
        }
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        let max = self.max_threads.max(1);
        let min = self.min_threads.clamp(1, max);
        (available / 2).clamp(min, max)
    }

    pub fn capacity(&self, workers: usize) -> usize {
        self.queue_capacity.unwrap_or(workers).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Pages,
    Links,
    Redirects,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Pages, Table::Links, Table::Redirects];

    pub fn name(self) -> &'static str {
        match self {
            Table::Pages => "pages",
            Table::Links => "links",
            Table::Redirects => "redirects",
        }
    }

    pub fn header(self) -> &'static [&'static str] {
        match self {
            Table::Pages => &["id", "title", "text", "disambiguation", "categories"],
            Table::Links => &["id", "start", "end", "surface", "target"],
            Table::Redirects => &["id", "title", "target"],
        }
    }
}

/// How records are routed to shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardBy {
    /// Submission ordinal modulo shard count
    #[default]
    Ordinal,
    /// Stable hash of the article id
    ArticleId,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub output_dir: String,
    pub shard_count: u32,
    pub shard_by: ShardBy,
    pub tables: BTreeSet<Table>,
    /// Write page rows for pages outside the main and category namespaces
    pub include_other_namespaces: bool,
    pub dry_run: bool,
}

impl OutputConfig {
    pub fn new(output_dir: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            shard_count: DEFAULT_CSV_SHARDS,
            shard_by: ShardBy::Ordinal,
            tables: Table::ALL.into_iter().collect(),
            include_other_namespaces: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pool: PoolConfig,
    pub convert: ConvertOptions,
    pub output: OutputConfig,
    pub limit: Option<u64>,
    pub show_progress: bool,
}

impl PipelineConfig {
    pub fn new(output: OutputConfig) -> Self {
        Self {
            pool: PoolConfig::default(),
            convert: ConvertOptions::default(),
            output,
            limit: None,
            show_progress: false,
        }
    }
}
