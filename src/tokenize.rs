use anyhow::{Context, Result};
use jieba_rs::Jieba;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Shared segmenter dictionary. Built once, read-only afterward.
fn segmenter() -> &'static Jieba {
    static JIEBA: OnceLock<Jieba> = OnceLock::new();
    JIEBA.get_or_init(Jieba::new)
}

#[derive(Debug, Clone)]
pub struct TokenFilter {
    stopwords: HashSet<String>,
    min_len: usize,
}

impl Default for TokenFilter {
    fn default() -> Self {
        Self {
            stopwords: HashSet::new(),
            min_len: 2,
        }
    }
}

impl TokenFilter {
    pub fn new(stopwords: HashSet<String>, min_len: usize) -> Self {
        Self { stopwords, min_len }
    }

    fn keeps(&self, token: &str) -> bool {
        token.chars().count() >= self.min_len
            && !self.stopwords.contains(token)
            && token.chars().all(is_allowed_char)
    }
}

/// CJK ideographs, ASCII letters and digits. Everything else (punctuation,
/// whitespace, symbols) disqualifies the whole token.
fn is_allowed_char(ch: char) -> bool {
    matches!(ch, '\u{4e00}'..='\u{9fa5}') || ch.is_ascii_alphanumeric()
}

/// Segments normalized text and yields retained tokens in source order.
pub fn tokenize<'a>(text: &'a str, filter: &'a TokenFilter) -> impl Iterator<Item = &'a str> + 'a {
    segmenter()
        .cut(text, true)
        .into_iter()
        .filter(move |token| filter.keeps(token))
}

/// One stopword per line, UTF-8. A missing path means the empty default set;
/// an unreadable provided path is an error.
pub fn load_stopwords(path: Option<&Path>) -> Result<HashSet<String>> {
    let Some(path) = path else {
        return Ok(HashSet::new());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read stopword list: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
