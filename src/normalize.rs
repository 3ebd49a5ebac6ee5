use pulldown_cmark::{Options, Parser};

/// Flattens a batch of markup documents into one plain-text string.
///
/// A document that defeats extraction falls back to its raw text; a single
/// bad comment must never abort the batch.
pub fn documents_to_text(documents: &[String]) -> String {
    let mut text = String::new();
    for document in documents {
        text.push_str(&document_to_text(document));
        text.push('\n');
    }
    text
}

pub fn document_to_text(document: &str) -> String {
    let html = markdown_to_html(document);
    match visible_text(&html) {
        Some(text) if !text.trim().is_empty() => text,
        // Extraction came back empty for a non-empty document; keep the raw
        // text so downstream filtering decides what survives.
        _ => document.to_string(),
    }
}

fn markdown_to_html(document: &str) -> String {
    // Raw HTML fragments pass through pulldown-cmark untouched, so comments
    // that are already "cooked" HTML land in the parser unchanged.
    let parser = Parser::new_ext(document, Options::empty());
    let mut html = String::with_capacity(document.len());
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

fn visible_text(html: &str) -> Option<String> {
    use kuchiki::traits::*;

    let document = kuchiki::parse_html().one(html);
    let hidden = document
        .select("script, style")
        .ok()?
        .map(|node| node.as_node().clone())
        .collect::<Vec<_>>();
    for node in hidden {
        node.detach();
    }
    Some(document.text_contents())
}
