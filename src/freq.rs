use std::collections::HashMap;
use std::path::Path;

use crate::error::CloudError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyEntry {
    pub word: String,
    pub count: u64,
}

/// Counts tokens and ranks them by descending count. Ties keep the order in
/// which the words first appeared in the token stream, so identical input
/// always produces an identical list.
pub fn rank<'a>(tokens: impl IntoIterator<Item = &'a str>, min_frequency: u64) -> Vec<FrequencyEntry> {
    let mut counts: HashMap<&str, (usize, u64)> = HashMap::new();
    let mut next_index = 0usize;
    for token in tokens {
        let entry = counts.entry(token).or_insert_with(|| {
            let index = next_index;
            next_index += 1;
            (index, 0)
        });
        entry.1 += 1;
    }

    let mut entries: Vec<(usize, FrequencyEntry)> = counts
        .into_iter()
        .filter(|(_, (_, count))| *count >= min_frequency.max(1))
        .map(|(word, (first_seen, count))| {
            (
                first_seen,
                FrequencyEntry {
                    word: word.to_string(),
                    count,
                },
            )
        })
        .collect();
    entries.sort_by(|(first_a, a), (first_b, b)| {
        b.count.cmp(&a.count).then(first_a.cmp(first_b))
    });
    entries.into_iter().map(|(_, entry)| entry).collect()
}

/// Serializes the ranked list as a JSON array of `[word, count]` pairs,
/// the durable human-inspectable artifact format.
pub fn to_artifact_json(entries: &[FrequencyEntry]) -> String {
    let pairs: Vec<(&str, u64)> = entries
        .iter()
        .map(|entry| (entry.word.as_str(), entry.count))
        .collect();
    // Tuples of (&str, u64) cannot fail to serialize.
    serde_json::to_string_pretty(&pairs).unwrap_or_else(|_| "[]".to_string())
}

pub fn persist_ranked(path: &Path, entries: &[FrequencyEntry]) -> Result<(), CloudError> {
    std::fs::write(path, to_artifact_json(entries)).map_err(|source| CloudError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    })
}
