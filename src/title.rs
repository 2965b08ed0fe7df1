use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

/// Prefixes marking administrative (non-article) pages.
static SPECIAL_PREFIXES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "", "Media", "Special", "Talk", "User", "User_talk", "Meta", "Meta_talk", "Image",
        "Image_talk", "MediaWiki", "MediaWiki_talk", "Template", "Template_talk", "Help",
        "Help_talk", "Category", "Category_talk", "File", "File_talk", "Wikipedia",
        "Wikipedia_talk", "Portal", "Portal_talk", "WP", "Project", "CAT", "MOS",
    ]
    .into_iter()
    .collect()
});

/// Canonical form of a title or link target: lowercase first letter uppercased,
/// underscores turned into spaces. Nothing else is case-folded.
pub fn normalize_title(title: &str) -> String {
    let mut chars = title.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    let mut out = String::with_capacity(title.len());
    if first.is_lowercase() {
        out.extend(first.to_uppercase());
    } else {
        out.push(first);
    }
    out.push_str(chars.as_str());

    if out.contains('_') {
        out = out.replace('_', " ");
    }
    out
}

pub fn is_special_title(title: &str) -> bool {
    match title.split_once(':') {
        Some((prefix, _)) => SPECIAL_PREFIXES.contains(prefix),
        None => false,
    }
}
