//! Integration tests for the Ariadne annotation pipeline.
//!
//! This module drives the complete data flow from BZ2-compressed XML input
//! through the feeder, the worker pool and the converter into sharded CSV
//! output. Tests are organized into logical sections:
//!
//! - **Source Tests** -- XML parsing, BZ2 decompression, namespace detection
//! - **End-to-end Tests** -- redirect, page and link rows for a small dump
//! - **Concurrency Tests** -- no lost work under caller-runs backpressure
//! - **Determinism Tests** -- inline runs produce byte-identical shards
//!
//! # Test Strategy
//!
//! Dumps are built from XML strings with `create_bz2_xml()`, which writes a
//! `.xml.bz2` temp file the way real dumps are shipped. Every test writes into
//! its own `TempDir` and re-reads the shards with `csv::Reader`.

use ariadne::config::{OutputConfig, PipelineConfig, PoolConfig, ShardBy, Table};
use ariadne::feeder::run_pipeline;
use ariadne::models::ArticleRecord;
use ariadne::render::WikitextRenderer;
use ariadne::sink::shard_path;
use ariadne::source::{RecordSource, XmlDumpSource};
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::io::Write;
use std::ops::ControlFlow;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

/// Helper: compress `xml` into a temp file with a `.xml.bz2` suffix.
fn create_bz2_xml(xml: &str) -> NamedTempFile {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut tmp = tempfile::Builder::new()
        .suffix(".xml.bz2")
        .tempfile()
        .unwrap();
    tmp.write_all(&compressed).unwrap();
    tmp.flush().unwrap();
    tmp
}

/// One article with two links, one redirect, one disambiguation page.
fn sample_xml() -> &'static str {
    r#"<mediawiki>
        <page>
            <title>Dog</title>
            <ns>0</ns>
            <id>1</id>
            <revision>
                <id>100</id>
                <text>The '''dog''' is a [[mammal]] related to the [[Gray_wolf|wolf]].
[[Category:Mammals]]
{{animal-stub}}</text>
            </revision>
        </page>
        <page>
            <title>Doggy</title>
            <ns>0</ns>
            <id>2</id>
            <redirect title="Dog" />
            <revision>
                <id>200</id>
                <text>#REDIRECT [[dog]]</text>
            </revision>
        </page>
        <page>
            <title>Mercury (disambiguation)</title>
            <ns>0</ns>
            <id>3</id>
            <revision>
                <id>300</id>
                <text>'''Mercury''' may refer to:
* the planet
* the element
{{disambig}}</text>
            </revision>
        </page>
    </mediawiki>"#
}

fn namespaces_xml() -> &'static str {
    r#"<mediawiki>
        <page>
            <title>File:Dog.jpg</title>
            <ns>6</ns>
            <id>10</id>
            <revision><id>1000</id><text>A photo of a [[dog]].</text></revision>
        </page>
        <page>
            <title>Category:Mammals</title>
            <ns>14</ns>
            <id>11</id>
            <revision><id>1100</id><text>Animals that [[nurse]]. [[Category:Animals]]</text></revision>
        </page>
    </mediawiki>"#
}

fn pipeline_config(dir: &TempDir, shards: u32, pool: PoolConfig) -> PipelineConfig {
    let mut output = OutputConfig::new(dir.path().to_str().unwrap());
    output.shard_count = shards;
    let mut config = PipelineConfig::new(output);
    config.pool = pool;
    config
}

fn read_rows(config: &PipelineConfig, table: Table) -> Vec<csv::StringRecord> {
    let mut rows = Vec::new();
    for shard in 0..config.output.shard_count {
        let path = shard_path(&config.output.output_dir, table, shard);
        let mut reader = csv::Reader::from_path(path).unwrap();
        assert!(reader.headers().unwrap().iter().eq(table.header().iter().copied()));
        for record in reader.records() {
            rows.push(record.unwrap());
        }
    }
    rows
}

fn run_xml(xml: &str, config: &PipelineConfig) -> Arc<ariadne::stats::PipelineStats> {
    let tmp = create_bz2_xml(xml);
    let mut source = XmlDumpSource::open(tmp.path().to_str().unwrap()).unwrap();
    run_pipeline(&mut source, config, Arc::new(WikitextRenderer::new())).unwrap()
}

// ---------------------------------------------------------------------------
// Source tests
// ---------------------------------------------------------------------------

#[test]
fn source_reads_all_pages() {
    let tmp = create_bz2_xml(sample_xml());
    let mut source = XmlDumpSource::open(tmp.path().to_str().unwrap()).unwrap();
    let mut records = Vec::new();
    source
        .for_each_record(&mut |r: ArticleRecord| -> anyhow::Result<ControlFlow<()>> {
            records.push(r);
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();

    assert_eq!(records.len(), 3);
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert!(records.iter().all(|r| r.is_main_namespace));
    assert!(records[0].text().contains("[[Gray_wolf|wolf]]"));
}

#[test]
fn source_rejects_malformed_xml() {
    let tmp = create_bz2_xml("<mediawiki><page><title>X</title></oops></mediawiki>");
    let mut source = XmlDumpSource::open(tmp.path().to_str().unwrap()).unwrap();
    let result = source.for_each_record(&mut |_: ArticleRecord| -> anyhow::Result<ControlFlow<()>> {
        Ok(ControlFlow::Continue(()))
    });
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// End-to-end tests
// ---------------------------------------------------------------------------

#[test]
fn end_to_end_three_records() {
    let dir = TempDir::new().unwrap();
    let config = pipeline_config(&dir, 1, PoolConfig::with_threads(2));
    let stats = run_xml(sample_xml(), &config);

    assert_eq!(stats.seen(), 3);
    assert_eq!(stats.submitted(), 2);
    assert_eq!(stats.redirects(), 1);
    assert_eq!(stats.disambiguations(), 1);
    assert_eq!(stats.stubs(), 1);
    assert_eq!(stats.links(), 2);
    assert_eq!(stats.failures(), 0);
    assert_eq!(stats.write_errors(), 0);

    let redirects = read_rows(&config, Table::Redirects);
    assert_eq!(redirects.len(), 1);
    assert_eq!(&redirects[0][0], "2");
    assert_eq!(&redirects[0][1], "Doggy");
    assert_eq!(&redirects[0][2], "Dog");

    let mut pages = read_rows(&config, Table::Pages);
    pages.sort_by(|a, b| a[0].cmp(&b[0]));
    assert_eq!(pages.len(), 2);
    assert_eq!(&pages[0][1], "Dog");
    assert_eq!(&pages[0][2], "The dog is a  mammal  related to the  wolf .\n\n");
    assert_eq!(&pages[0][3], "false");
    assert_eq!(&pages[0][4], r#"{"Mammals"}"#);
    assert_eq!(&pages[1][1], "Mercury (disambiguation)");
    assert_eq!(&pages[1][3], "true");

    let links = read_rows(&config, Table::Links);
    assert_eq!(links.len(), 2);
    let text = &pages[0][2];
    for link in &links {
        assert_eq!(&link[0], "1");
        let start: usize = link[1].parse().unwrap();
        let end: usize = link[2].parse().unwrap();
        let surface: String = text.chars().skip(start).take(end - start).collect();
        assert_eq!(surface, &link[3]);
    }
    assert_eq!(&links[0][3], "mammal");
    assert_eq!(&links[0][4], "Mammal");
    assert_eq!(&links[1][3], "wolf");
    assert_eq!(&links[1][4], "Gray wolf");
}

#[test]
fn non_main_namespaces_get_minimal_rows() {
    let dir = TempDir::new().unwrap();
    let config = pipeline_config(&dir, 1, PoolConfig::inline());
    let stats = run_xml(namespaces_xml(), &config);

    assert_eq!(stats.submitted(), 0);
    assert_eq!(stats.minimal(), 2);

    // category pages keep their categories, file pages are not written
    let pages = read_rows(&config, Table::Pages);
    assert_eq!(pages.len(), 1);
    assert_eq!(&pages[0][0], "11");
    assert_eq!(&pages[0][2], "");
    assert_eq!(&pages[0][4], r#"{"Animals"}"#);
    assert!(read_rows(&config, Table::Links).is_empty());
}

#[test]
fn dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let mut output = OutputConfig::new(out.to_str().unwrap());
    output.dry_run = true;
    let mut config = PipelineConfig::new(output);
    config.pool = PoolConfig::with_threads(2);

    let stats = run_xml(sample_xml(), &config);
    assert_eq!(stats.seen(), 3);
    assert_eq!(stats.rows(), 5);
    assert!(!out.exists());
}

// ---------------------------------------------------------------------------
// Concurrency tests
// ---------------------------------------------------------------------------

#[test]
fn backpressure_loses_no_work() {
    let dir = TempDir::new().unwrap();
    let config = pipeline_config(
        &dir,
        3,
        PoolConfig {
            queue_capacity: Some(1),
            ..PoolConfig::with_threads(2)
        },
    );
    let mut records: Vec<ArticleRecord> = (0..2000)
        .map(|i| {
            ArticleRecord::main(
                i.to_string(),
                format!("Article {}", i),
                format!("Body of {} with [[Article {}|a link]] and [[Article {}]].", i, i + 1, i + 2),
            )
        })
        .collect();
    let stats = run_pipeline(&mut records, &config, Arc::new(WikitextRenderer::new())).unwrap();

    assert_eq!(stats.submitted(), 2000);
    assert_eq!(stats.rendered(), 2000);
    assert_eq!(read_rows(&config, Table::Pages).len(), 2000);

    let links = read_rows(&config, Table::Links);
    assert_eq!(links.len(), 4000);
    // rows of one article are contiguous
    for pair in links.chunks(2) {
        assert_eq!(&pair[0][0], &pair[1][0]);
        assert_eq!(&pair[0][3], "a link");
    }
}

// ---------------------------------------------------------------------------
// Determinism tests
// ---------------------------------------------------------------------------

fn shard_bytes(config: &PipelineConfig) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for table in Table::ALL {
        for shard in 0..config.output.shard_count {
            out.push(std::fs::read(shard_path(&config.output.output_dir, table, shard)).unwrap());
        }
    }
    out
}

#[test]
fn inline_runs_are_byte_identical() {
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();
    let first = pipeline_config(&first_dir, 3, PoolConfig::inline());
    let second = pipeline_config(&second_dir, 3, PoolConfig::inline());

    run_xml(sample_xml(), &first);
    run_xml(sample_xml(), &second);

    assert_eq!(shard_bytes(&first), shard_bytes(&second));
}

#[test]
fn id_routing_is_stable_across_thread_counts() {
    let inline_dir = TempDir::new().unwrap();
    let pooled_dir = TempDir::new().unwrap();
    let mut inline = pipeline_config(&inline_dir, 4, PoolConfig::inline());
    let mut pooled = pipeline_config(&pooled_dir, 4, PoolConfig::with_threads(3));
    inline.output.shard_by = ShardBy::ArticleId;
    pooled.output.shard_by = ShardBy::ArticleId;

    let records = || -> Vec<ArticleRecord> {
        (0..50)
            .map(|i| ArticleRecord::main(i.to_string(), format!("P{}", i), "x"))
            .collect()
    };
    run_pipeline(&mut records(), &inline, Arc::new(WikitextRenderer::new())).unwrap();
    run_pipeline(&mut records(), &pooled, Arc::new(WikitextRenderer::new())).unwrap();

    for shard in 0..4 {
        let ids = |config: &PipelineConfig| {
            let path = shard_path(&config.output.output_dir, Table::Pages, shard);
            let mut reader = csv::Reader::from_path(path).unwrap();
            let mut ids: Vec<String> = reader.records().map(|r| r.unwrap()[0].to_string()).collect();
            ids.sort();
            ids
        };
        assert_eq!(ids(&inline), ids(&pooled));
    }
}
