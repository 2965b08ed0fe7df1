//! Markup rendering.
//!
//! [`Renderer`] is the seam between the pipeline and whatever turns raw markup
//! into a node tree. [`WikitextRenderer`] is a lightweight tokenizer for the
//! common wikitext constructs: it never expands templates, it skips them.

use crate::convert::{Converter, Node, Tag};
use crate::title::is_special_title;
use anyhow::Result;
use memchr::{memchr, memchr2, memmem};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;

/// Nesting beyond this is kept as literal text
const MAX_PARSE_DEPTH: usize = 16;

static HEADING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(={2,6})\s*(.+?)\s*={2,6}\s*$").unwrap());

static INTERLANGUAGE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(?:-[a-z]+)*$").unwrap());

/// Namespaces whose links produce no visible text at all
const HIDDEN_NAMESPACES: &[&str] = &["file", "image", "media", "category"];

/// Tag names recognised in markup; any other `<` is literal text
const HTML_TAGS: &[&str] = &[
    "abbr", "b", "big", "blockquote", "br", "center", "cite", "code", "dd", "del", "div", "dl",
    "dt", "em", "font", "hr", "i", "ins", "kbd", "li", "math", "nowiki", "ol", "p", "poem", "pre",
    "q", "ref", "references", "s", "small", "span", "strike", "strong", "sub", "sup", "tt", "u",
    "ul", "var",
];

const EXTERNAL_SCHEMES: &[&str] = &["http://", "https://", "ftp://", "//"];

/// Renders raw markup through a converter that records link offsets.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        raw_text: &str,
        converter: &mut Converter<'_>,
    ) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WikitextRenderer;

impl WikitextRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw_text: &str) -> Vec<Node> {
        parse_fragment(raw_text, 0)
    }
}

impl Renderer for WikitextRenderer {
    fn render(
        &self,
        raw_text: &str,
        converter: &mut Converter<'_>,
    ) -> Result<String> {
        let nodes = self.parse(raw_text);
        Ok(converter.convert(&nodes))
    }
}

/// Result of consuming a construct: the node it produced (if any) and where parsing resumes.
type Step = (Option<Node>, usize);

#[derive(Default)]
struct Fragment {
    nodes: Vec<Node>,
    text: String,
}

impl Fragment {
    fn emit(&mut self, node: Option<Node>) {
        if let Some(node) = node {
            self.flush();
            self.nodes.push(node);
        }
    }

    fn flush(&mut self) {
        if !self.text.is_empty() {
            self.nodes.push(Node::Text(std::mem::take(&mut self.text)));
        }
    }

    fn finish(mut self) -> Vec<Node> {
        self.flush();
        self.nodes
    }
}

fn parse_fragment(src: &str, depth: usize) -> Vec<Node> {
    if src.is_empty() {
        return Vec::new();
    }
    if depth > MAX_PARSE_DEPTH {
        return vec![Node::text(src)];
    }
    Scanner::new(src, depth).parse()
}

/// Single-fragment tokenizer. Delimiter pairs are matched once up front and
/// failed searches are remembered, so unbalanced input stays linear.
struct Scanner<'s> {
    src: &'s str,
    depth: usize,
    braces: FxHashMap<usize, usize>,
    brackets: FxHashMap<usize, usize>,
    /// Per tag name, the earliest offset from which no closing tag exists
    closing_misses: FxHashMap<String, usize>,
    /// Earliest offset from which no table terminator exists
    table_miss: Option<usize>,
}

impl<'s> Scanner<'s> {
    fn new(src: &'s str, depth: usize) -> Self {
        let bytes = src.as_bytes();
        Self {
            src,
            depth,
            braces: pair_positions(bytes, b"{{", b"}}"),
            brackets: pair_positions(bytes, b"[[", b"]]"),
            closing_misses: FxHashMap::default(),
            table_miss: None,
        }
    }

    fn parse(mut self) -> Vec<Node> {
        let src = self.src;
        let bytes = src.as_bytes();
        let mut out = Fragment::default();
        let mut run = 0;
        let mut i = 0;

        while i < bytes.len() {
            let step = if i == 0 || bytes[i - 1] == b'\n' {
                self.line_construct(i)
            } else {
                None
            };
            let step = step.or_else(|| match bytes[i] {
                b'{' => self.template(i),
                b'[' => self.link(i),
                b'<' => self.html(i),
                b'\'' => quotes(bytes, i),
                _ => None,
            });

            match step {
                Some((node, end)) => {
                    out.text.push_str(&src[run..i]);
                    out.emit(node);
                    i = end;
                    run = end;
                }
                None => i += 1,
            }
        }

        out.text.push_str(&src[run..]);
        out.finish()
    }

    fn line_construct(&mut self, i: usize) -> Option<Step> {
        let src = self.src;
        let bytes = src.as_bytes();
        let line_end = memchr(b'\n', &bytes[i..]).map_or(bytes.len(), |p| i + p);
        let line = &src[i..line_end];

        if let Some(caps) = HEADING_REGEX.captures(line) {
            let level = caps[1].len();
            let title = Tag::new("span", parse_fragment(&caps[2], self.depth + 1));
            let heading = Tag::new(format!("h{}", level), vec![title.into()]);
            return Some((Some(heading.into()), line_end));
        }

        if line.starts_with("----") {
            let dashes = line.bytes().take_while(|&b| b == b'-').count();
            return Some((Some(Node::void("hr")), i + dashes));
        }

        if line.starts_with("{|") {
            if self.table_miss.is_some_and(|miss| miss <= i) {
                return None;
            }
            // tables are skipped whole
            return match memmem::find(&bytes[i..], b"\n|}") {
                Some(p) => Some((None, i + p + 3)),
                None => {
                    self.table_miss = Some(i);
                    None
                }
            };
        }

        let markers = line
            .bytes()
            .take_while(|b| matches!(b, b'*' | b'#' | b':' | b';'))
            .count();
        if markers > 0 {
            return Some((None, i + markers));
        }
        None
    }

    fn template(&self, i: usize) -> Option<Step> {
        // unbalanced braces stay in the text for the converter to filter
        self.braces.get(&i).map(|&close| (None, close + 2))
    }

    fn link(&self, i: usize) -> Option<Step> {
        if let Some(&close) = self.brackets.get(&i) {
            return Some(self.internal_link(i + 2, close));
        }
        self.external_link(i)
    }

    fn internal_link(&self, inner_start: usize, close: usize) -> Step {
        let src = self.src;
        let inner = &src[inner_start..close];
        let mut end = close + 2;

        let (raw_target, label) = match inner.split_once('|') {
            Some((target, label)) => (target.trim(), Some(label)),
            None => (inner.trim(), None),
        };
        let leading_colon = raw_target.starts_with(':');
        let target = raw_target.trim_start_matches(':').trim();

        if !leading_colon {
            if let Some((prefix, _)) = target.split_once(':') {
                let prefix = prefix.trim();
                // interlanguage prefixes are written in lowercase
                if INTERLANGUAGE_PREFIX.is_match(prefix)
                    || HIDDEN_NAMESPACES.contains(&prefix.to_ascii_lowercase().as_str())
                {
                    return (None, end);
                }
            }
        }

        let mut label = match label {
            Some(l) if !l.trim().is_empty() => l.to_string(),
            _ => target.to_string(),
        };
        let body = label.clone();

        let trail = src.as_bytes()[end..]
            .iter()
            .take_while(|b| b.is_ascii_lowercase())
            .count();
        label.push_str(&src[end..end + trail]);
        end += trail;

        let children = parse_fragment(&label, self.depth + 1);
        let page = target.split('#').next().unwrap_or("").trim();
        let namespaced = page.contains(':') && is_special_title(&page.replace(' ', "_"));

        let tag = if page.is_empty() || namespaced {
            Tag::new("a", children)
        } else {
            Tag::anchor(page, children)
        };
        (Some(tag.with_body(body).into()), end)
    }

    fn external_link(&self, i: usize) -> Option<Step> {
        let rest = &self.src[i + 1..];
        if !EXTERNAL_SCHEMES.iter().any(|s| rest.starts_with(s)) {
            return None;
        }
        let bytes = rest.as_bytes();
        let close = memchr2(b']', b'\n', bytes)?;
        if bytes[close] != b']' {
            return None;
        }
        let end = i + 1 + close + 1;
        let node = rest[..close]
            .split_once(char::is_whitespace)
            .map(|(_, label)| label.trim())
            .filter(|label| !label.is_empty())
            .map(|label| Tag::new("a", parse_fragment(label, self.depth + 1)).into());
        Some((node, end))
    }

    fn html(&mut self, i: usize) -> Option<Step> {
        let src = self.src;
        let bytes = src.as_bytes();
        if bytes[i..].starts_with(b"<!--") {
            let end = memmem::find(&bytes[i + 4..], b"-->").map_or(bytes.len(), |p| i + 4 + p + 3);
            return Some((None, end));
        }

        let closing = bytes.get(i + 1) == Some(&b'/');
        let name_start = if closing { i + 2 } else { i + 1 };
        if !bytes.get(name_start).is_some_and(u8::is_ascii_alphabetic) {
            return None;
        }
        let name_len = bytes[name_start..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric())
            .count();
        let name_end = name_start + name_len;
        if !matches!(bytes.get(name_end), Some(b'>' | b'/' | b' ' | b'\t' | b'\n')) {
            return None;
        }
        let name = src[name_start..name_end].to_ascii_lowercase();
        if !HTML_TAGS.contains(&name.as_str()) {
            return None;
        }
        let gt = name_end + memchr2(b'>', b'\n', &bytes[name_end..])?;
        if bytes[gt] != b'>' {
            return None;
        }
        let open_end = gt + 1;
        let self_closing = bytes[gt - 1] == b'/';

        if name == "br" || name == "hr" {
            return Some((Some(Node::void(name)), open_end));
        }
        if closing || self_closing {
            let node = (name == "ref").then(|| Tag::new("ref", Vec::new()).into());
            return Some((node, open_end));
        }

        let Some((inner_end, end)) = self.find_closing_tag(open_end, &name) else {
            // unmatched open tag: drop it, keep what follows
            return Some((None, open_end));
        };
        let inner = &src[open_end..inner_end];
        let node = match name.as_str() {
            "ref" => Tag::new("ref", Vec::new()).with_body(inner).into(),
            "nowiki" | "pre" => Node::text(inner),
            _ => Tag::new(name, parse_fragment(inner, self.depth + 1)).into(),
        };
        Some((Some(node), end))
    }

    /// Start of `</name` and the position just past its `>`, matched case-insensitively.
    fn find_closing_tag(&mut self, from: usize, name: &str) -> Option<(usize, usize)> {
        if self
            .closing_misses
            .get(name)
            .is_some_and(|&miss| miss <= from)
        {
            return None;
        }
        let found = scan_closing_tag(self.src.as_bytes(), from, name);
        if found.is_none() {
            self.closing_misses.insert(name.to_string(), from);
        }
        found
    }
}

fn quotes(bytes: &[u8], i: usize) -> Option<Step> {
    let run = bytes[i..].iter().take_while(|&&b| b == b'\'').count();
    (run >= 2).then_some((None, i + run))
}

fn scan_closing_tag(bytes: &[u8], from: usize, name: &str) -> Option<(usize, usize)> {
    let mut pos = from;
    while let Some(off) = memmem::find(&bytes[pos..], b"</") {
        let at = pos + off;
        let name_end = at + 2 + name.len();
        if name_end <= bytes.len() && bytes[at + 2..name_end].eq_ignore_ascii_case(name.as_bytes())
        {
            let gt = memchr(b'>', &bytes[name_end..])?;
            return Some((at, name_end + gt + 1));
        }
        pos = at + 2;
    }
    None
}

/// Maps each opening delimiter to the delimiter that closes it, honouring nesting.
/// Openers left unclosed at the end of input are absent.
fn pair_positions(bytes: &[u8], open: &[u8], close: &[u8]) -> FxHashMap<usize, usize> {
    let mut pairs = FxHashMap::default();
    if memmem::find(bytes, open).is_none() {
        return pairs;
    }
    let mut stack = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i..].starts_with(open) {
            stack.push(i);
            i += 2;
        } else if bytes[i..].starts_with(close) {
            if let Some(opened) = stack.pop() {
                pairs.insert(opened, i);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConvertOptions;
    use crate::convert::{LinkAnnotationConverter, LinkSink};
    use crate::models::{CharIndex, LinkSpan};

    fn render(raw: &str) -> (String, Vec<LinkSpan>) {
        let mut links: Vec<LinkSpan> = Vec::new();
        let text = {
            let sink: &mut dyn LinkSink = &mut links;
            let mut converter = LinkAnnotationConverter::new(sink, ConvertOptions::default());
            WikitextRenderer::new().render(raw, &mut converter).unwrap()
        };
        (text, links)
    }

    fn surfaces(text: &str, links: &[LinkSpan]) -> Vec<String> {
        let idx = CharIndex::new(text);
        links
            .iter()
            .map(|l| idx.slice(l.start, l.end).to_string())
            .collect()
    }

    #[test]
    fn two_links() {
        let (text, links) = render("See [[Paris]] and [[France|the country]].");
        assert_eq!(text, "See  Paris  and  the country .");
        assert_eq!(surfaces(&text, &links), vec!["Paris", "the country"]);
        assert_eq!(links[0].target, "Paris");
        assert_eq!(links[1].target, "France");
    }

    #[test]
    fn templates_skipped() {
        let (text, links) = render("{{Infobox|name=[[X]]}}Rust is [[fast]].");
        assert_eq!(text, "Rust is  fast .");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "fast");
    }

    #[test]
    fn unbalanced_template_filtered() {
        let (text, _) = render("x {{cite web|title=y");
        assert_eq!(text, "x ");
    }

    #[test]
    fn hidden_namespaces_dropped() {
        let (text, links) = render("a[[File:X.jpg|thumb|A [[caption]]]]b[[Category:Dogs]]c[[fr:Chien]]d");
        assert_eq!(text, "abcd");
        assert!(links.is_empty());
    }

    #[test]
    fn namespaced_link_has_no_target() {
        let (text, links) = render("[[Talk:Dog|talk page]] and [[:Category:Dogs]]");
        assert_eq!(text, "talk page and Category:Dogs");
        assert!(links.is_empty());
    }

    #[test]
    fn section_link_has_no_target() {
        let (text, links) = render("[[#History|below]]");
        assert_eq!(text, "below");
        assert!(links.is_empty());
    }

    #[test]
    fn fragment_stripped_from_target() {
        let (_, links) = render("[[Paris#History|history of Paris]]");
        assert_eq!(links[0].target, "Paris");
    }

    #[test]
    fn trailing_letters_blend() {
        let (text, links) = render("[[dog]]s bark");
        assert_eq!(surfaces(&text, &links), vec!["dogs"]);
        assert_eq!(links[0].target, "dog");
    }

    #[test]
    fn transl_marker_falls_back_to_target() {
        let (text, links) = render("[[Tokyo_Tower|{{transl}}]]");
        assert_eq!(text, " Tokyo Tower ");
        assert_eq!(links[0].target, "Tokyo_Tower");
    }

    #[test]
    fn references_dropped() {
        let (text, links) = render("Fact.<ref name=\"a\">[[Cite]]</ref> More<ref name=\"a\"/>.");
        assert_eq!(text, "Fact. More.");
        assert!(links.is_empty());
    }

    #[test]
    fn headings_elided() {
        let (text, _) = render("Intro\n== History ==\nText");
        assert_eq!(text, "Intro\n\nText");
    }

    #[test]
    fn formatting_removed() {
        let (text, _) = render("'''Rust''' is ''fast''.\n* one\n# two");
        assert_eq!(text, "Rust is fast.\n one\n two");
    }

    #[test]
    fn external_links_render_label_only() {
        let (text, links) = render("[https://www.rust-lang.org Official site] and [http://x.org]");
        assert_eq!(text, "Official site and ");
        assert!(links.is_empty());
    }

    #[test]
    fn comments_and_breaks() {
        let (text, _) = render("a<!-- hidden -->b<br/>c<BR>d\n----\ne");
        assert_eq!(text, "ab\n\nc\n\nd\n\n\n\ne");
    }

    #[test]
    fn tables_skipped() {
        let (text, _) = render("before\n{| class=\"wikitable\"\n| [[A]] || b\n|}\nafter");
        assert_eq!(text, "before\n\nafter");
    }

    #[test]
    fn html_tags_unwrapped() {
        let (text, links) = render("<small>tiny [[Ant]]</small> <nowiki>[[raw]]</nowiki>");
        assert_eq!(text, "tiny  Ant  [[raw]]");
        assert!(links.len() == 1);
    }

    #[test]
    fn entities_decoded() {
        let (text, _) = render("Tom &amp; Jerry&nbsp;!");
        assert_eq!(text, "Tom & Jerry\u{a0}!");
    }

    #[test]
    fn stray_angle_bracket_is_text() {
        let (text, _) = render("1 < 2 and a <b");
        assert_eq!(text, "1 < 2 and a <b");
    }

    #[test]
    fn comparisons_stay_in_text() {
        let (text, links) = render("when n<5 the [[Sum]] is small. Otherwise a>b.");
        assert_eq!(text, "when n<5 the  Sum  is small. Otherwise a>b.");
        assert_eq!(surfaces(&text, &links), vec!["Sum"]);

        let (text, links) = render("for 0<x and x>1 holds, see [[Real number]]");
        assert_eq!(text, "for 0<x and x>1 holds, see  Real number ");
        assert_eq!(links[0].target, "Real number");

        let (text, _) = render("if a<b then");
        assert_eq!(text, "if a<b then");
    }

    #[test]
    fn unknown_tags_are_text() {
        let (text, _) = render("<foo>bar</foo> and <Widget x>");
        assert_eq!(text, "<foo>bar</foo> and <Widget x>");
    }

    #[test]
    fn tag_does_not_span_lines() {
        let (text, _) = render("<span\nclass>x");
        assert_eq!(text, "<span\nclass>x");
    }

    #[test]
    fn colon_titles_are_not_interlanguage() {
        let (text, links) = render("He starred in [[CSI: Miami]] for years.");
        assert_eq!(text, "He starred in  CSI: Miami  for years.");
        assert_eq!(links[0].target, "CSI: Miami");

        let (text, links) = render("See [[Ys: The Vanished Omens]].");
        assert_eq!(surfaces(&text, &links), vec!["Ys: The Vanished Omens"]);
    }

    #[test]
    fn unbalanced_input_is_linear() {
        let start = std::time::Instant::now();

        let (text, links) = render(&"{{".repeat(40_000));
        assert!(text.is_empty());
        assert!(links.is_empty());

        let raw = "[[".repeat(40_000);
        assert_eq!(render(&raw).0, raw);

        let (text, _) = render(&"<p>x ".repeat(20_000));
        assert_eq!(text, "x ".repeat(20_000));

        let (text, _) = render(&"{|\nrow\n".repeat(10_000));
        assert!(text.contains("row"));

        assert!(start.elapsed() < std::time::Duration::from_secs(3));
    }

    #[test]
    fn empty_input() {
        let (text, links) = render("");
        assert!(text.is_empty());
        assert!(links.is_empty());
    }
}
