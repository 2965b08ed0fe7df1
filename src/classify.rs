use crate::config::DISAMBIGUATION_TEMPLATES;
use crate::title::normalize_title;
use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const REDIRECT_MARKER: &str = "#REDIRECT";
const STUB_MARKER: &[u8] = b"-stub}}";
const DISAMBIGUATION_SUFFIX: &str = "(disambiguation)";

static CATEGORY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[Category:(.*?)\]\]").unwrap());

static DEFAULT_CLASSIFIER: Lazy<Classifier> =
    Lazy::new(|| Classifier::new(DISAMBIGUATION_TEMPLATES).unwrap());

/// Metadata derived from an article's raw markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageMeta {
    pub is_redirect: bool,
    pub redirect_target: Option<String>,
    pub is_disambiguation: bool,
    pub is_stub: bool,
    pub categories: Vec<String>,
}

impl PageMeta {
    /// Redirects carry no categories; they never reach rendering.
    pub fn redirect(target: String) -> Self {
        Self {
            is_redirect: true,
            redirect_target: Some(target),
            ..Self::default()
        }
    }
}

/// Page classifier with a fixed set of disambiguation template names.
pub struct Classifier {
    disambiguation: Regex,
}

impl Classifier {
    pub fn new<S: AsRef<str>>(templates: &[S]) -> Result<Self, regex::Error> {
        let mut names = Vec::with_capacity(templates.len() * 2);
        for name in templates {
            let name = name.as_ref();
            names.push(regex::escape(name));
            let lowered = lowercase_initial(name);
            if lowered != name {
                names.push(regex::escape(&lowered));
            }
        }
        let pattern = if names.is_empty() {
            // matches nothing
            r"[^\s\S]".to_string()
        } else {
            format!(r"\{{\{{(?:{})[|}}]", names.join("|"))
        };
        let disambiguation = Regex::new(&pattern)?;
        Ok(Self { disambiguation })
    }

    pub fn classify(&self, title: &str, text: Option<&str>) -> PageMeta {
        let Some(text) = text else {
            return PageMeta {
                is_disambiguation: title.ends_with(DISAMBIGUATION_SUFFIX),
                ..PageMeta::default()
            };
        };

        if let Some(target) = redirect_target(text) {
            return PageMeta {
                is_stub: is_stub(text),
                is_disambiguation: self.is_disambiguation(title, text),
                ..PageMeta::redirect(target)
            };
        }

        PageMeta {
            is_redirect: false,
            redirect_target: None,
            is_disambiguation: self.is_disambiguation(title, text),
            is_stub: is_stub(text),
            categories: extract_categories(text),
        }
    }

    pub fn is_disambiguation(&self, title: &str, text: &str) -> bool {
        title.ends_with(DISAMBIGUATION_SUFFIX) || self.disambiguation.is_match(text)
    }
}

/// Classifies with the default disambiguation template set.
pub fn classify(title: &str, text: Option<&str>) -> PageMeta {
    DEFAULT_CLASSIFIER.classify(title, text)
}

pub fn is_redirect(text: &str) -> bool {
    redirect_target(text).is_some()
}

/// Normalized redirect target, or `None` when the marker or a non-empty `[[...]]` target is missing.
pub fn redirect_target(text: &str) -> Option<String> {
    let prefix = text.get(..REDIRECT_MARKER.len())?;
    if !prefix.eq_ignore_ascii_case(REDIRECT_MARKER) {
        return None;
    }

    let open = memmem::find(text.as_bytes(), b"[[")? + 2;
    let close = memmem::find(&text.as_bytes()[open..], b"]]")? + open;
    let inner = &text[open..close];
    let target = inner.split('|').next().unwrap_or("").trim();
    if target.is_empty() {
        return None;
    }
    Some(normalize_title(target))
}

pub fn is_stub(text: &str) -> bool {
    memmem::find(text.as_bytes(), STUB_MARKER).is_some()
}

pub fn is_disambiguation(title: &str, text: &str) -> bool {
    DEFAULT_CLASSIFIER.is_disambiguation(title, text)
}

pub fn extract_categories(text: &str) -> Vec<String> {
    CATEGORY_REGEX
        .captures_iter(text)
        .filter_map(|c| {
            let name = c[1].split('|').next().unwrap_or("").trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

fn lowercase_initial(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
