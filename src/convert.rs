//! Tree-to-text conversion with link offset tracking.
//!
//! The renderer hands the converter a tree of [`Node`]s. The converter flattens
//! it into plain text and reports every anchor that rendered to visible content
//! through a [`LinkSink`], as character offsets into the text being built.

use crate::config::{ConvertOptions, RECURSION_ERROR_MARKER};
use crate::models::LinkSpan;
use html_escape::decode_html_entities;
use tracing::trace;

const TEMPLATE_OPEN: &str = "{{";
const TEMPLATE_CLOSE: &str = "}}";

/// Anchor body that renders as its own link target when nothing else shows.
const LITERAL_TRANSL: &str = "{{transl}}";

const LINK_SEPARATOR: char = ' ';
const PARAGRAPH_BREAK: &str = "\n\n";

/// A node of the rendered markup tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Plain-text content token
    Text(String),
    /// Inline, block or anchor tag with its children
    Tag(Tag),
    /// End-tag marker or void tag such as `br`
    Void(String),
    /// Nested sub-tree
    Group(Vec<Node>),
}

impl Node {
    pub fn text(content: impl Into<String>) -> Self {
        Node::Text(content.into())
    }

    pub fn void(name: impl Into<String>) -> Self {
        Node::Void(name.into())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tag {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Raw markup the tag was built from, when the renderer keeps it
    pub body: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            children,
            ..Self::default()
        }
    }

    pub fn anchor(href: impl Into<String>, children: Vec<Node>) -> Self {
        Self::new("a", children).with_attribute("href", href)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl From<Tag> for Node {
    fn from(tag: Tag) -> Self {
        Node::Tag(tag)
    }
}

/// Receives link occurrences at `[start, end)` character offsets with their raw target.
pub trait LinkSink {
    fn has_link(&mut self, start: usize, end: usize, target: &str);
}

impl LinkSink for Vec<LinkSpan> {
    fn has_link(&mut self, start: usize, end: usize, target: &str) {
        self.push(LinkSpan {
            start,
            end,
            target: target.to_string(),
        });
    }
}

/// Plain-text output that tracks its length in characters alongside bytes.
#[derive(Debug, Default)]
pub struct TextBuffer {
    text: String,
    chars: usize,
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    bytes: usize,
    chars: usize,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, s: &str) {
        self.chars += s.chars().count();
        self.text.push_str(s);
    }

    pub fn push(&mut self, c: char) {
        self.chars += 1;
        self.text.push(c);
    }

    pub fn char_len(&self) -> usize {
        self.chars
    }

    pub fn into_string(self) -> String {
        self.text
    }

    fn mark(&self) -> Mark {
        Mark {
            bytes: self.text.len(),
            chars: self.chars,
        }
    }

    fn truncate(&mut self, mark: Mark) {
        self.text.truncate(mark.bytes);
        self.chars = mark.chars;
    }

    fn is_blank_since(&self, mark: Mark) -> bool {
        self.text[mark.bytes..].chars().all(char::is_whitespace)
    }
}

/// Converter over a type-erased sink, as handed to renderers.
pub type Converter<'s> = LinkAnnotationConverter<'s, dyn LinkSink + 's>;

/// Flattens a node tree into plain text, reporting link spans to the sink.
pub struct LinkAnnotationConverter<'s, S: LinkSink + ?Sized> {
    sink: &'s mut S,
    options: ConvertOptions,
    depth: usize,
}

impl<'s, S: LinkSink + ?Sized> LinkAnnotationConverter<'s, S> {
    pub fn new(sink: &'s mut S, options: ConvertOptions) -> Self {
        Self {
            sink,
            options,
            depth: 0,
        }
    }

    /// Converts a whole tree and returns the plain text.
    pub fn convert(&mut self, nodes: &[Node]) -> String {
        let mut out = TextBuffer::new();
        self.nodes_to_text(nodes, &mut out);
        out.into_string()
    }

    pub fn nodes_to_text(&mut self, nodes: &[Node], out: &mut TextBuffer) {
        if nodes.is_empty() {
            return;
        }
        self.depth += 1;
        if self.depth > self.options.recursion_limit {
            out.push_str(RECURSION_ERROR_MARKER);
        } else {
            for node in nodes {
                self.node_to_text(node, out);
            }
        }
        self.depth -= 1;
    }

    fn node_to_text(&mut self, node: &Node, out: &mut TextBuffer) {
        match node {
            Node::Group(children) => self.nodes_to_text(children, out),
            Node::Text(content) => out.push_str(&clean_content(content)),
            Node::Tag(tag) => self.tag_to_text(tag, out),
            Node::Void(name) => match name.as_str() {
                "br" | "hr" => out.push_str(PARAGRAPH_BREAK),
                other => trace!(tag = other, "Void tag not handled"),
            },
        }
    }

    fn tag_to_text(&mut self, tag: &Tag, out: &mut TextBuffer) {
        match tag.name.as_str() {
            "ref" => {}
            "span" if !self.options.keep_section_titles => {}
            "a" => match tag.attribute("href") {
                Some(href) => self.anchor_to_text(tag, href, out),
                None => self.nodes_to_text(&tag.children, out),
            },
            _ => self.nodes_to_text(&tag.children, out),
        }
    }

    fn anchor_to_text(&mut self, tag: &Tag, href: &str, out: &mut TextBuffer) {
        out.push(LINK_SEPARATOR);
        let start = out.mark();
        self.nodes_to_text(&tag.children, out);

        if out.is_blank_since(start) {
            if let Some(fallback) = special_rendering(tag, href) {
                out.truncate(start);
                out.push_str(&fallback);
            }
        }

        if !out.is_blank_since(start) {
            self.sink.has_link(start.chars, out.char_len(), href);
        }
        out.push(LINK_SEPARATOR);
    }
}

/// Rendering for anchors whose body is a recognised literal template.
fn special_rendering(tag: &Tag, href: &str) -> Option<String> {
    match tag.body.as_deref() {
        Some(LITERAL_TRANSL) => Some(href.replace('_', " ")),
        _ => None,
    }
}

/// Decodes entities, then drops everything inside leftover `{{ ... }}` delimiters.
pub fn clean_content(content: &str) -> String {
    let decoded = decode_html_entities(content);
    strip_template_braces(&decoded)
}

/// Brace-depth filter: only text at depth zero survives; depth never goes negative.
pub fn strip_template_braces(content: &str) -> String {
    if !content.contains(TEMPLATE_OPEN) && !content.contains(TEMPLATE_CLOSE) {
        return content.to_string();
    }

    let mut result = String::with_capacity(content.len());
    let mut depth: usize = 0;
    let mut rest = content;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with(TEMPLATE_OPEN) {
            depth += 1;
            rest = &rest[TEMPLATE_OPEN.len()..];
        } else if rest.starts_with(TEMPLATE_CLOSE) {
            depth = depth.saturating_sub(1);
            rest = &rest[TEMPLATE_CLOSE.len()..];
        } else {
            if depth == 0 {
                result.push(c);
            }
            rest = &rest[c.len_utf8()..];
        }
    }
    result
}

/// Converts `nodes` and collects the link spans.
pub fn convert_nodes(nodes: &[Node], options: ConvertOptions) -> (String, Vec<LinkSpan>) {
    let mut links = Vec::new();
    let text = LinkAnnotationConverter::new(&mut links, options).convert(nodes);
    (text, links)
}
