//! Dump record sources.

use crate::models::ArticleRecord;
use crate::title::is_special_title;
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::mem;
use std::ops::ControlFlow;
use std::path::Path;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 1024 * 1024;
const MAIN_NAMESPACE: i32 = 0;
const CATEGORY_NAMESPACE: i32 = 14;
const CATEGORY_PREFIX: &str = "Category:";

/// Pushes records to a callback until exhausted or the callback breaks.
pub trait RecordSource {
    fn for_each_record(
        &mut self,
        f: &mut dyn FnMut(ArticleRecord) -> Result<ControlFlow<()>>,
    ) -> Result<()>;
}

impl RecordSource for Vec<ArticleRecord> {
    fn for_each_record(
        &mut self,
        f: &mut dyn FnMut(ArticleRecord) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        for record in self.drain(..) {
            if f(record)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Namespace,
    Id,
    Text,
}

#[derive(Debug, Default)]
struct PartialPage {
    title: Option<String>,
    id: Option<String>,
    namespace: Option<i32>,
    text: Option<String>,
}

impl PartialPage {
    fn into_record(self) -> Option<ArticleRecord> {
        let title = self.title?;
        let id = self.id?;
        let (is_main_namespace, is_category_namespace) = match self.namespace {
            Some(ns) => (ns == MAIN_NAMESPACE, ns == CATEGORY_NAMESPACE),
            None if title.starts_with(CATEGORY_PREFIX) => (false, true),
            None => (!is_special_title(&title.replace(' ', "_")), false),
        };
        Some(ArticleRecord {
            id,
            title,
            raw_text: self.text,
            is_main_namespace,
            is_category_namespace,
        })
    }
}

/// Streams `<page>` elements from a MediaWiki XML export.
pub struct XmlDumpSource {
    reader: Reader<Box<dyn BufRead>>,
    label: String,
}

impl XmlDumpSource {
    /// Opens `path`; `-` reads stdin and a `.bz2` suffix selects multistream bzip2.
    pub fn open(path: &str) -> Result<Self> {
        let input: Box<dyn BufRead> = if path == "-" {
            Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, io::stdin()))
        } else {
            let file = File::open(path)
                .with_context(|| format!("Failed to open dump file: {}", path))?;
            if Path::new(path).extension().is_some_and(|e| e == "bz2") {
                Box::new(BufReader::with_capacity(
                    READ_BUFFER_SIZE,
                    MultiBzDecoder::new(file),
                ))
            } else {
                Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file))
            }
        };
        debug!(path, "Opened dump");
        Ok(Self::from_reader(input, path))
    }

    pub fn from_reader<R: BufRead + 'static>(input: R, label: impl Into<String>) -> Self {
        let input: Box<dyn BufRead> = Box::new(input);
        Self {
            reader: Reader::from_reader(input),
            label: label.into(),
        }
    }
}

impl RecordSource for XmlDumpSource {
    fn for_each_record(
        &mut self,
        f: &mut dyn FnMut(ArticleRecord) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut buf = Vec::with_capacity(8192);
        let mut text = String::new();
        let mut page: Option<PartialPage> = None;
        let mut field: Option<Field> = None;
        let mut in_revision = false;

        loop {
            let event = self.reader.read_event_into(&mut buf).with_context(|| {
                format!(
                    "Malformed XML in {} at byte {}",
                    self.label,
                    self.reader.buffer_position()
                )
            })?;

            match event {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"page" => {
                        page = Some(PartialPage::default());
                        in_revision = false;
                    }
                    b"revision" => in_revision = true,
                    name if page.is_some() => {
                        field = match name {
                            b"title" => Some(Field::Title),
                            b"ns" => Some(Field::Namespace),
                            b"id" => Some(Field::Id),
                            b"text" => Some(Field::Text),
                            _ => None,
                        };
                        text.clear();
                    }
                    _ => {}
                },
                Event::Empty(ref e) => {
                    if e.local_name().as_ref() == b"text" {
                        if let Some(page) = page.as_mut() {
                            page.text = Some(String::new());
                        }
                    }
                }
                Event::Text(ref e) => {
                    if field.is_some() {
                        let unescaped = e.unescape().with_context(|| {
                            format!("Bad entity in {} near byte {}", self.label, self.reader.buffer_position())
                        })?;
                        text.push_str(&unescaped);
                    }
                }
                Event::CData(ref e) => {
                    if field.is_some() {
                        text.push_str(&String::from_utf8_lossy(e));
                    }
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"revision" => in_revision = false,
                    b"page" => {
                        if let Some(done) = page.take() {
                            match done.into_record() {
                                Some(record) => {
                                    if f(record)?.is_break() {
                                        return Ok(());
                                    }
                                }
                                None => warn!(source = %self.label, "Skipping page without id or title"),
                            }
                        }
                    }
                    _ => {
                        if let (Some(current), Some(page)) = (field.take(), page.as_mut()) {
                            let value = mem::take(&mut text);
                            match current {
                                Field::Title => page.title = Some(value),
                                Field::Namespace => page.namespace = value.trim().parse().ok(),
                                Field::Id => {
                                    if !in_revision && page.id.is_none() {
                                        page.id = Some(value.trim().to_string());
                                    }
                                }
                                Field::Text => page.text = Some(value),
                            }
                        }
                    }
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(())
    }
}
