//! Ariadne: concurrent link annotation for encyclopedia dumps
//!
//! This crate turns a dump of raw-markup articles into plain text annotated
//! with character-offset hyperlink spans, plus per-article metadata
//! (categories, redirect target, disambiguation and stub flags), written to
//! sharded CSV tables for bulk loading:
//!
//! 1. **Feeding** -- A single thread streams records from the dump, assigns
//!    each an ordinal and decides whether it needs rendering. Redirects,
//!    empty pages and non-article pages are classified right there.
//! 2. **Annotation** -- Worker threads render markup into a node tree and
//!    flatten it to text, recording where every link landed.
//! 3. **Output** -- Each article's rows go to one shard per table
//!    (`pages`, `links`, `redirects`) in a single locked write.
//! 4. **Merge Pass** (optional) -- Combine shards into one file per table.
//!
//! # Architecture
//!
//! - **Streaming XML parsing** -- Never loads the dump into memory
//! - **Caller-runs backpressure** -- A bounded queue; when it is full the
//!   feeder runs the task itself instead of blocking or dropping it
//! - **Per-worker scratch buffers** -- Rows are serialized without holding a lock
//! - **Failure isolation** -- A panicking or failing article is logged and skipped
//! - **Atomic operations** -- Lock-free counters for run statistics
//!
//! # Key Modules
//!
//! - [`source`] -- Record sources, including the BZ2-aware XML dump reader
//! - [`feeder`] -- Admission, submission and progress reporting
//! - [`pool`] -- Bounded worker pool and per-worker resources
//! - [`annotate`] -- Per-article render-then-classify task
//! - [`render`] -- Renderer seam and the wikitext tokenizer
//! - [`convert`] -- Node tree to text with link offset tracking
//! - [`classify`] -- Redirect, disambiguation, stub and category detection
//! - [`title`] -- Title normalization
//! - [`sink`] -- Sharded CSV output
//! - [`merge`] -- Shard merging
//! - [`models`] -- Core data types (ArticleRecord, RenderedArticle, LinkSpan)
//! - [`stats`] -- Thread-safe atomic counters
//! - [`config`] -- Constants and runtime configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Annotate with 8 output shards
//! ariadne annotate -i enwiki-latest-pages-articles.xml.bz2 -o output/ --csv-shards 8
//!
//! # Render one article to JSON
//! ariadne render --title Dog dog.wiki
//!
//! # Merge shards into pages.csv, links.csv, redirects.csv
//! ariadne merge-csvs -o output/
//! ```

pub mod annotate;
pub mod classify;
pub mod config;
pub mod convert;
pub mod feeder;
pub mod merge;
pub mod models;
pub mod pool;
pub mod render;
pub mod sink;
pub mod source;
pub mod stats;
pub mod title;
