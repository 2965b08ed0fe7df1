use crate::classify::PageMeta;
use serde::Serialize;

/// One raw record from the dump.
#[derive(Debug, Clone, Default)]
pub struct ArticleRecord {
    pub id: String,
    pub title: String,
    pub raw_text: Option<String>,
    pub is_main_namespace: bool,
    pub is_category_namespace: bool,
}

impl ArticleRecord {
    pub fn main(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            raw_text: Some(text.into()),
            is_main_namespace: true,
            is_category_namespace: false,
        }
    }

    pub fn text(&self) -> &str {
        self.raw_text.as_deref().unwrap_or("")
    }

    pub fn namespace(&self) -> Namespace {
        if self.is_main_namespace {
            Namespace::Main
        } else if self.is_category_namespace {
            Namespace::Category
        } else {
            Namespace::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Main,
    Category,
    Other,
}

/// A hyperlink occurrence at `[start, end)` character offsets of the rendered text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkSpan {
    pub start: usize,
    pub end: usize,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedArticle {
    pub id: String,
    pub title: String,
    pub namespace: Namespace,
    pub text: String,
    pub links: Vec<LinkSpan>,
    pub meta: PageMeta,
}

impl RenderedArticle {
    /// Substring of the text covered by `link`.
    pub fn surface(&self, link: &LinkSpan) -> &str {
        CharIndex::new(&self.text).slice(link.start, link.end)
    }
}

/// Maps character offsets to byte offsets; free for ASCII text.
pub struct CharIndex<'t> {
    text: &'t str,
    bytes: Option<Vec<usize>>,
}

impl<'t> CharIndex<'t> {
    pub fn new(text: &'t str) -> Self {
        let bytes = if text.is_ascii() {
            None
        } else {
            let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
            offsets.push(text.len());
            Some(offsets)
        };
        Self { text, bytes }
    }

    fn byte(&self, char_offset: usize) -> usize {
        match &self.bytes {
            None => char_offset.min(self.text.len()),
            Some(offsets) => offsets
                .get(char_offset)
                .copied()
                .unwrap_or(self.text.len()),
        }
    }

    /// Out-of-range offsets are clamped to the end of the text.
    pub fn slice(&self, start: usize, end: usize) -> &'t str {
        let start = self.byte(start);
        let end = self.byte(end).max(start);
        &self.text[start..end]
    }
}
