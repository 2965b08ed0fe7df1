//! Per-article annotation task.

use crate::classify::classify;
use crate::config::ConvertOptions;
use crate::convert::{LinkAnnotationConverter, LinkSink};
use crate::models::{ArticleRecord, LinkSpan, RenderedArticle};
use crate::render::Renderer;
use crate::title::normalize_title;
use anyhow::{Context, Result};

/// Renders one article with a fresh converter session, then classifies it.
pub fn annotate(
    record: &ArticleRecord,
    renderer: &dyn Renderer,
    options: ConvertOptions,
) -> Result<RenderedArticle> {
    let mut links: Vec<LinkSpan> = Vec::new();
    let text = {
        let sink: &mut dyn LinkSink = &mut links;
        let mut converter = LinkAnnotationConverter::new(sink, options);
        renderer
            .render(record.text(), &mut converter)
            .with_context(|| format!("Failed to render article {} ({})", record.id, record.title))?
    };

    let meta = classify(&record.title, record.raw_text.as_deref());
    if text.is_empty() {
        links.clear();
    }

    Ok(RenderedArticle {
        id: record.id.clone(),
        title: normalize_title(&record.title),
        namespace: record.namespace(),
        text,
        links,
        meta,
    })
}

/// Metadata-only article for records that are never rendered.
pub fn minimal(record: &ArticleRecord) -> RenderedArticle {
    RenderedArticle {
        id: record.id.clone(),
        title: normalize_title(&record.title),
        namespace: record.namespace(),
        text: String::new(),
        links: Vec::new(),
        meta: classify(&record.title, record.raw_text.as_deref()),
    }
}
