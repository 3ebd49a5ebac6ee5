use std::path::PathBuf;
use thiserror::Error;

/// Pipeline-level failures. Per-item problems (one document, one mask, one
/// word) are recovered with a documented fallback and never show up here.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("no tokens left after filtering; nothing to render")]
    EmptyInput,

    #[error("font resource missing: {0}")]
    FontResourceMissing(String),

    #[error("cancelled before {stage}")]
    Cancelled { stage: &'static str },

    #[error("failed to read comments file: {path}")]
    CommentsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("comments file is not a JSON array of strings: {path}")]
    CommentsMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write artifact: {path}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load stopword list")]
    Stopwords(#[source] anyhow::Error),

    #[error("failed to render output image: {0}")]
    Render(String),
}

/// Mask images that cannot be decoded. Always recovered by the caller
/// (treated as "no mask"), so this never escapes the pipeline.
#[derive(Debug, Error)]
#[error("failed to decode mask image: {reason}")]
pub struct MaskDecodeError {
    pub reason: String,
}

impl MaskDecodeError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
