use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use discourse_wordcloud::fetch::DiscourseClient;
use discourse_wordcloud::{CancelToken, Config, batch_identifier, generate, load_comments};

#[derive(Parser, Debug)]
#[command(
    name = "discourse-wordcloud",
    version,
    about = "Generate keyword-frequency word clouds from Discourse topics"
)]
struct Cli {
    /// Topic ids to fetch, comma separated (e.g. 369211,254606)
    #[arg(value_delimiter = ',')]
    topic_ids: Vec<u64>,

    /// Use a local comments file (JSON array of markup strings) instead of fetching
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Artifact name stem (default: derived from topic ids or input file)
    #[arg(long = "identifier")]
    identifier: Option<String>,

    /// Mask image (PNG/JPEG); omitted means the full rectangular canvas
    #[arg(short = 'm', long = "mask")]
    mask: Option<PathBuf>,

    /// Stopword list, one word per line
    #[arg(short = 's', long = "stopwords")]
    stopwords: Option<PathBuf>,

    /// Directory for the PNG and frequency artifacts
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// Discourse session cookie (_t token; falls back to DISCOURSE_COOKIE)
    #[arg(short = 'c', long = "cookie")]
    cookie: Option<String>,

    /// Random seed for reproducible rotation and colors
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Minimum count for a word to enter the ranked list
    #[arg(long = "min-frequency", default_value_t = 1)]
    min_frequency: u64,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// Run as an HTTP API instead (e.g. --serve 127.0.0.1:8080)
    #[arg(long = "serve")]
    serve: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    discourse_wordcloud::logging::init(cli.verbose)?;

    let settings = discourse_wordcloud::settings::load_settings(cli.read_settings.as_deref())?;

    if let Some(addr) = cli.serve {
        return discourse_wordcloud::server::run_server(settings, cli.output_dir, addr).await;
    }

    let (comments, identifier) = if let Some(input) = &cli.input {
        let comments = load_comments(input)?;
        let identifier = cli
            .identifier
            .clone()
            .unwrap_or_else(|| identifier_from_input(input));
        (comments, identifier)
    } else {
        if cli.topic_ids.is_empty() {
            return Err(anyhow!("provide topic ids or --input <words.json>"));
        }
        let cookie = cli
            .cookie
            .clone()
            .or_else(|| std::env::var("DISCOURSE_COOKIE").ok());
        let client = DiscourseClient::new(
            &settings.base_url,
            cookie,
            Duration::from_millis(settings.request_delay_ms),
        )?;
        let (comments, fetched_ids) =
            fetch_topics(&client, &cli.topic_ids, &cli.output_dir).await?;
        let identifier = cli
            .identifier
            .clone()
            .unwrap_or_else(|| batch_identifier(&fetched_ids));
        (comments, identifier)
    };

    let config = Config {
        identifier,
        output_dir: cli.output_dir,
        mask_path: cli.mask,
        stopword_path: cli.stopwords,
        extra_stopwords: Vec::new(),
        min_frequency: cli.min_frequency,
        seed: cli.seed,
    };

    let outcome = generate(&comments, &config, &settings, &CancelToken::new())?;

    println!("word cloud: {}", outcome.image_path.display());
    println!("frequencies: {}", outcome.frequency_path.display());
    println!(
        "placed {} words ({} dropped for lack of space)",
        outcome.placed, outcome.dropped
    );
    for entry in outcome.ranked.iter().take(20) {
        println!("{:>6}  {}", entry.count, entry.word);
    }
    Ok(())
}

/// Fetches each topic, reusing the per-topic comments artifact when a
/// previous run already wrote it. Topics that fail or come back empty are
/// skipped; the batch fails only when nothing remains.
async fn fetch_topics(
    client: &DiscourseClient,
    topic_ids: &[u64],
    output_dir: &Path,
) -> Result<(Vec<String>, Vec<u64>)> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir: {}", output_dir.display()))?;

    let mut comments = Vec::new();
    let mut fetched_ids = Vec::new();
    for &topic_id in topic_ids {
        let cache_path = output_dir.join(format!("topic_{}_words.json", topic_id));
        if cache_path.exists() {
            let cached = load_comments(&cache_path)?;
            comments.extend(cached);
            fetched_ids.push(topic_id);
            continue;
        }
        match client.fetch_topic_comments(topic_id).await {
            Ok(topic_comments) if topic_comments.is_empty() => {
                warn!(topic_id, "topic has no comments, skipping");
            }
            Ok(topic_comments) => {
                let json = serde_json::to_string_pretty(&topic_comments)
                    .with_context(|| "failed to serialize comments")?;
                std::fs::write(&cache_path, json).with_context(|| {
                    format!("failed to write comments cache: {}", cache_path.display())
                })?;
                comments.extend(topic_comments);
                fetched_ids.push(topic_id);
            }
            Err(err) => {
                warn!(topic_id, error = %format!("{:#}", err), "topic fetch failed, skipping");
            }
        }
    }

    if fetched_ids.is_empty() {
        return Err(anyhow!("no topic yielded any comments"));
    }
    Ok((comments, fetched_ids))
}

fn identifier_from_input(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.trim_end_matches("_words").to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "wordcloud".to_string())
}
