use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub mod error;
pub mod fetch;
pub mod font;
pub mod freq;
pub mod layout;
pub mod logging;
pub mod mask;
pub mod normalize;
pub mod render;
pub mod server;
pub mod settings;
#[cfg(test)]
mod test_util;
pub mod tokenize;

pub use error::{CloudError, MaskDecodeError};
pub use freq::FrequencyEntry;
pub use layout::{LayoutOptions, LayoutOutcome, PlacedWord};
pub use mask::{MaskBitmap, MaskPolarity};
pub use settings::Settings;

/// Caller-driven cancellation, checked between pipeline stages and between
/// placements so a timeout can abort a long layout search cleanly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Artifact name stem: `<identifier>.png` and `<identifier>_freq.json`.
    pub identifier: String,
    pub output_dir: PathBuf,
    pub mask_path: Option<PathBuf>,
    pub stopword_path: Option<PathBuf>,
    /// Stopwords supplied inline (the HTTP API sends them per request),
    /// merged with the file list.
    pub extra_stopwords: Vec<String>,
    pub min_frequency: u64,
    pub seed: Option<u64>,
}

impl Config {
    pub fn new(identifier: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            output_dir: output_dir.into(),
            mask_path: None,
            stopword_path: None,
            extra_stopwords: Vec::new(),
            min_frequency: 1,
            seed: None,
        }
    }
}

#[derive(Debug)]
pub struct GenerateOutcome {
    pub image_path: PathBuf,
    pub frequency_path: PathBuf,
    pub ranked: Vec<FrequencyEntry>,
    pub placed: usize,
    /// Words the layout engine could not fit anywhere. Non-fatal diagnostic.
    pub dropped: usize,
}

/// Reads the durable comments artifact: a JSON array of raw markup strings.
pub fn load_comments(path: &Path) -> Result<Vec<String>, CloudError> {
    let content = std::fs::read_to_string(path).map_err(|source| CloudError::CommentsUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CloudError::CommentsMalformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs the whole pipeline for one batch of comments: normalize, tokenize,
/// rank (persisting the frequency artifact), binarize the mask, lay out, and
/// render the PNG.
pub fn generate(
    comments: &[String],
    config: &Config,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<GenerateOutcome, CloudError> {
    checkpoint(cancel, "normalize")?;
    let text = normalize::documents_to_text(comments);

    checkpoint(cancel, "tokenize")?;
    let mut stopwords = tokenize::load_stopwords(config.stopword_path.as_deref())
        .map_err(CloudError::Stopwords)?;
    stopwords.extend(config.extra_stopwords.iter().cloned());
    let filter = tokenize::TokenFilter::new(stopwords, 2);
    let tokens: Vec<&str> = tokenize::tokenize(&text, &filter).collect();
    if tokens.is_empty() {
        return Err(CloudError::EmptyInput);
    }
    info!(tokens = tokens.len(), "retained tokens");

    checkpoint(cancel, "rank")?;
    let ranked = freq::rank(tokens.iter().copied(), config.min_frequency);
    std::fs::create_dir_all(&config.output_dir).map_err(|source| CloudError::ArtifactWrite {
        path: config.output_dir.clone(),
        source,
    })?;
    let frequency_path = config
        .output_dir
        .join(format!("{}_freq.json", config.identifier));
    freq::persist_ranked(&frequency_path, &ranked)?;
    info!(words = ranked.len(), path = %frequency_path.display(), "ranked list persisted");

    checkpoint(cancel, "mask")?;
    let mask = match &config.mask_path {
        Some(path) => {
            match MaskBitmap::from_path(path, settings.width, settings.height, settings.mask_polarity)
            {
                Ok(mask) => mask,
                Err(err) => {
                    // Recoverable: an unreadable mask degrades to the full
                    // rectangular canvas.
                    warn!(mask = %path.display(), error = %err, "mask unusable, using full canvas");
                    MaskBitmap::full(settings.width, settings.height)
                }
            }
        }
        None => MaskBitmap::full(settings.width, settings.height),
    };

    checkpoint(cancel, "layout")?;
    let font = font::resolve_font(
        settings.font_path.as_deref().map(Path::new),
        settings.font_family.as_deref(),
    )?;
    let layout_options = LayoutOptions {
        max_words: settings.max_words,
        min_font_size: settings.min_font_size,
        max_font_size: settings.max_font_size,
        prefer_horizontal: settings.prefer_horizontal,
        padding: settings.padding,
        seed: config.seed,
    };
    let outcome = layout::layout(&ranked, &mask, Some(&font), &layout_options, cancel)?;
    if outcome.dropped > 0 {
        warn!(dropped = outcome.dropped, "words dropped for lack of space");
    }

    checkpoint(cancel, "render")?;
    let render_options = render::RenderOptions {
        width: settings.width,
        height: settings.height,
        scale: settings.scale,
        background: settings.background.clone(),
    };
    let png = render::render_png(&outcome.words, &render_options, &font)?;
    let image_path = config.output_dir.join(format!("{}.png", config.identifier));
    std::fs::write(&image_path, png).map_err(|source| CloudError::ArtifactWrite {
        path: image_path.clone(),
        source,
    })?;
    info!(path = %image_path.display(), placed = outcome.words.len(), "word cloud written");

    Ok(GenerateOutcome {
        image_path,
        frequency_path,
        placed: outcome.words.len(),
        dropped: outcome.dropped,
        ranked,
    })
}

/// Artifact name stem for a batch of topics: a single topic keeps its id,
/// a multi-topic batch gets a stable digest of the sorted id list.
pub fn batch_identifier(topic_ids: &[u64]) -> String {
    match topic_ids {
        [single] => format!("topic_{}", single),
        many => {
            let mut sorted = many.to_vec();
            sorted.sort_unstable();
            let joined = sorted
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join("_");
            let digest = format!("{:x}", md5::compute(joined.as_bytes()));
            format!("combined_{}", &digest[..8])
        }
    }
}

fn checkpoint(cancel: &CancelToken, stage: &'static str) -> Result<(), CloudError> {
    if cancel.is_cancelled() {
        Err(CloudError::Cancelled { stage })
    } else {
        Ok(())
    }
}
