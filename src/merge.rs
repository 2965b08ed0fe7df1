use crate::config::{Table, MERGE_BUFFER_SIZE};
use crate::sink::shard_path;
use anyhow::{bail, Context, Result};
use csv::{Reader, Writer};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

/// Rows copied into one merged table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTable {
    pub table: Table,
    pub shards: u32,
    pub rows: u64,
}

/// Concatenates `<table>_NNN.csv` shards into `<table>.csv` for single-file loaders.
/// Tables are merged in parallel; a table with no shards is skipped.
pub fn merge_csv_shards(output_dir: &str) -> Result<Vec<MergedTable>> {
    info!("Detecting CSV shards in: {}", output_dir);

    let tables: Vec<(Table, u32)> = Table::ALL
        .into_iter()
        .map(|table| (table, detect_shard_count(output_dir, table)))
        .filter(|&(_, count)| count > 0)
        .collect();
    if tables.is_empty() {
        bail!("No sharded CSV files found (expected pages_000.csv, etc.)");
    }

    let merged = tables
        .par_iter()
        .map(|&(table, shards)| merge_table(output_dir, table, shards))
        .collect::<Result<Vec<_>>>()?;

    info!("Merge complete");
    Ok(merged)
}

/// Counts consecutive `<table>_NNN.csv` files starting at 000.
fn detect_shard_count(output_dir: &str, table: Table) -> u32 {
    let mut count = 0u32;
    while shard_path(output_dir, table, count).exists() {
        count += 1;
    }
    count
}

fn merge_table(output_dir: &str, table: Table, shard_count: u32) -> Result<MergedTable> {
    info!(table = table.name(), shards = shard_count, "Merging");

    let output_path = Path::new(output_dir).join(format!("{}.csv", table.name()));
    let file = File::create(&output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut writer = Writer::from_writer(BufWriter::with_capacity(MERGE_BUFFER_SIZE, file));
    writer.write_record(table.header())?;

    let mut rows = 0u64;
    for shard in 0..shard_count {
        let path = shard_path(output_dir, table, shard);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut reader = Reader::from_reader(BufReader::new(file));

        let headers = reader.headers()?;
        if headers.iter().ne(table.header().iter().copied()) {
            bail!("Unexpected header in {}", path.display());
        }

        for result in reader.records() {
            let record =
                result.with_context(|| format!("Malformed row in {}", path.display()))?;
            writer.write_record(&record)?;
            rows += 1;
        }
    }

    writer.flush()?;
    Ok(MergedTable {
        table,
        shards: shard_count,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_shard(dir: &Path, table: Table, shard: u32, rows: &[&str]) -> Result<()> {
        let path = shard_path(dir.to_str().unwrap(), table, shard);
        let mut file = File::create(path)?;
        writeln!(file, "{}", table.header().join(","))?;
        for row in rows {
            writeln!(file, "{}", row)?;
        }
        Ok(())
    }

    #[test]
    fn test_detect_shard_count() -> Result<()> {
        let temp_dir = TempDir::new()?;
        for i in 0..3 {
            create_test_shard(temp_dir.path(), Table::Pages, i, &[])?;
        }

        let dir = temp_dir.path().to_str().unwrap();
        assert_eq!(detect_shard_count(dir, Table::Pages), 3);
        assert_eq!(detect_shard_count(dir, Table::Links), 0);
        Ok(())
    }

    #[test]
    fn test_no_shards() {
        let temp_dir = TempDir::new().unwrap();
        let result = merge_csv_shards(temp_dir.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_table() -> Result<()> {
        let temp_dir = TempDir::new()?;
        create_test_shard(
            temp_dir.path(),
            Table::Links,
            0,
            &["1,5,10,Paris,Paris", "1,17,23,France,France"],
        )?;
        create_test_shard(temp_dir.path(), Table::Links, 1, &["2,0,3,Dog,Dog"])?;

        let merged = merge_table(temp_dir.path().to_str().unwrap(), Table::Links, 2)?;
        assert_eq!(merged.rows, 3);

        let content = fs::read_to_string(temp_dir.path().join("links.csv"))?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "id,start,end,surface,target");
        assert_eq!(lines[3], "2,0,3,Dog,Dog");
        Ok(())
    }

    #[test]
    fn test_header_mismatch() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = shard_path(temp_dir.path().to_str().unwrap(), Table::Redirects, 0);
        fs::write(path, "id:ID,title,:LABEL\n1,A,Page\n")?;

        let result = merge_table(temp_dir.path().to_str().unwrap(), Table::Redirects, 1);
        assert!(result.is_err());
        Ok(())
    }
}
