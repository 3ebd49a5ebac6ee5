use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36";

/// Retrieval collaborator for a Discourse forum. The auth cookie is a
/// construction-time value; nothing here is process-global.
pub struct DiscourseClient {
    http: reqwest::Client,
    base_url: String,
    cookie: Option<String>,
    page_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct TopicPage {
    #[serde(default)]
    post_stream: PostStream,
}

#[derive(Debug, Default, Deserialize)]
struct PostStream {
    #[serde(default)]
    posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    post_number: u64,
    #[serde(default)]
    cooked: String,
}

impl DiscourseClient {
    /// `cookie` is the raw `_t` session token, not a full Cookie header.
    pub fn new(base_url: &str, cookie: Option<String>, page_delay: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .with_context(|| "failed to build http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie,
            page_delay,
        })
    }

    /// Fetches every comment of a topic, oldest first, walking the paginated
    /// JSON endpoint until a 404 or an empty page. The opening post is not a
    /// comment and is skipped. An empty `Vec` means "topic has no comments",
    /// which callers must distinguish from a transport failure.
    pub async fn fetch_topic_comments(&self, topic_id: u64) -> Result<Vec<String>> {
        let mut comments = Vec::new();
        let mut page = 1u32;

        loop {
            let url = format!("{}/t/{}.json?page={}", self.base_url, topic_id, page);
            let mut request = self.http.get(&url).header("Accept", "application/json");
            if let Some(cookie) = &self.cookie {
                request = request.header("Cookie", format!("_t={}", cookie));
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("request failed: {}", url))?;
            if response.status() == StatusCode::NOT_FOUND {
                break;
            }
            if !response.status().is_success() {
                return Err(anyhow!("{} returned {}", url, response.status()));
            }

            let parsed: TopicPage = response
                .json()
                .await
                .with_context(|| format!("invalid topic json: {}", url))?;
            if parsed.post_stream.posts.is_empty() {
                break;
            }

            let before = comments.len();
            comments.extend(
                parsed
                    .post_stream
                    .posts
                    .into_iter()
                    .filter(|post| post.post_number > 1)
                    .map(|post| post.cooked),
            );
            debug!(topic_id, page, new = comments.len() - before, "fetched page");

            page += 1;
            tokio::time::sleep(self.page_delay).await;
        }

        info!(topic_id, count = comments.len(), "topic fetched");
        Ok(comments)
    }
}
