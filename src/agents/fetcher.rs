//! Article fetcher agent
//!
//! Retrieves the article over HTTP, maps upstream status codes to
//! [`FetchError`] and extracts readable text with `article_scraper`
//! (Mozilla Readability), falling back to a tag-stripping extractor when
//! Readability fails or panics on odd markup.

use super::{FetchError, RawContent};
use crate::observability::metrics::metrics;
use crate::retry::{RetryError, RetryExecutor, RetryPolicy};
use crate::text::truncate_chars;
use crate::validation::{NormalizedUrl, UrlValidator};
use article_scraper::Readability;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Redirect hops followed before giving up
pub const MAX_REDIRECTS: usize = 5;

static TITLE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok());

/// Tags whose content never counts as article text
const SKIPPED_TAGS: &[&str] = &[
    "head", "script", "style", "nav", "header", "footer", "noscript",
];

/// Raw HTTP answer from the article source
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    pub body: String,
}

/// Outbound HTTP capability used by the fetcher
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// One GET request; transport failures map to `Timeout` / `Unreachable`
    async fn get(&self, url: &Url) -> Result<HttpResponse, FetchError>;
}

/// Connection settings for [`ReqwestFetch`]
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_body_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("article-digest/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// `reqwest`-backed fetcher whose redirect policy re-validates every hop
pub struct ReqwestFetch {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestFetch {
    pub fn new(settings: FetchSettings, validator: Arc<UrlValidator>) -> Result<Self, reqwest::Error> {
        let redirect_policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error(format!("more than {MAX_REDIRECTS} redirects"))
            } else if validator.permits(attempt.url()) {
                attempt.follow()
            } else {
                let target = attempt.url().to_string();
                attempt.error(format!("redirect to disallowed URL {target}"))
            }
        });

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent)
            .redirect(redirect_policy)
            .build()?;

        Ok(Self {
            client,
            max_body_bytes: settings.max_body_bytes,
        })
    }

    fn transport_error(e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_redirect() {
            FetchError::Forbidden(e.to_string())
        } else {
            FetchError::Unreachable(e.to_string())
        }
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        if !response.status().is_success() {
            return Ok(HttpResponse {
                status,
                final_url,
                body: String::new(),
            });
        }

        // bodies past the cap are truncated, not rejected
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(Self::transport_error)? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= self.max_body_bytes {
                debug!(url = %url, max_bytes = self.max_body_bytes, "Article body truncated");
                break;
            }
        }

        Ok(HttpResponse {
            status,
            final_url,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Map an upstream status code to success or a [`FetchError`] (pure function)
pub fn classify_status(response: HttpResponse) -> Result<HttpResponse, FetchError> {
    match response.status {
        200..=299 => Ok(response),
        404 | 410 => Err(FetchError::NotFound(response.final_url)),
        401 | 403 => Err(FetchError::Forbidden(response.final_url)),
        408 | 429 | 500..=599 => Err(FetchError::Unreachable(format!(
            "{} answered {}",
            response.final_url, response.status
        ))),
        other => Err(FetchError::UpstreamStatus(other)),
    }
}

/// Fetch stage of the pipeline
pub struct ArticleFetcher {
    http: Arc<dyn HttpFetch>,
    validator: Arc<UrlValidator>,
    retry: RetryExecutor,
    policy: RetryPolicy,
    max_content_chars: usize,
}

impl ArticleFetcher {
    pub fn new(
        http: Arc<dyn HttpFetch>,
        validator: Arc<UrlValidator>,
        retry: RetryExecutor,
        policy: RetryPolicy,
        max_content_chars: usize,
    ) -> Self {
        Self {
            http,
            validator,
            retry,
            policy,
            max_content_chars,
        }
    }

    pub async fn fetch(&self, url: &NormalizedUrl) -> Result<RawContent, RetryError<FetchError>> {
        let started = Instant::now();
        let result = self.fetch_content(url).await;
        metrics().stage_executed("fetch", started.elapsed(), result.is_ok());
        result
    }

    async fn fetch_content(&self, url: &NormalizedUrl) -> Result<RawContent, RetryError<FetchError>> {
        let response = self
            .retry
            .execute(&self.policy, "fetch", || async {
                classify_status(self.http.get(url.as_url()).await?)
            })
            .await?;

        let landed_on_allowed_url = Url::parse(&response.final_url)
            .map(|final_url| self.validator.permits(&final_url))
            .unwrap_or(false);
        if !landed_on_allowed_url {
            warn!(url = %url, final_url = %response.final_url, "Fetch ended outside the allow-list");
            return Err(RetryError::Terminal(FetchError::Forbidden(format!(
                "redirected to disallowed URL {}",
                response.final_url
            ))));
        }

        let title = extract_title(&response.body);
        let text = extract_readable_text(&response.body, url.as_url()).await;
        let text = truncate_chars(text.trim(), self.max_content_chars).to_string();

        if text.is_empty() {
            return Err(RetryError::Terminal(FetchError::EmptyContent(
                url.to_string(),
            )));
        }

        debug!(url = %url, chars = text.chars().count(), "Article content extracted");
        Ok(RawContent {
            url: url.clone(),
            title,
            text,
            fetched_at: Utc::now(),
        })
    }
}

/// Readable text from an HTML page, Readability first and tag stripping second
pub async fn extract_readable_text(html: &str, url: &Url) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    // article_scraper can panic on malformed HTML; isolate it on the blocking pool
    let html_owned = html.to_string();
    let base_url = url.clone();
    let result = tokio::task::spawn_blocking(move || {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tokio::runtime::Handle::current()
                .block_on(async { Readability::extract(&html_owned, Some(base_url)).await })
        }))
    })
    .await;

    let extracted = match result {
        Ok(Ok(Ok(article_html))) => html_to_text(&article_html),
        Ok(Ok(Err(e))) => {
            debug!(error = %e, "Readability extraction failed, using simple extraction");
            String::new()
        }
        Ok(Err(_panic)) => {
            warn!(url = %url, "Readability panicked on page structure, using simple extraction");
            String::new()
        }
        Err(e) => {
            warn!(error = %e, "Extraction task failed, using simple extraction");
            String::new()
        }
    };

    if extracted.trim().is_empty() {
        html_to_text(html)
    } else {
        extracted
    }
}

fn extract_title(html: &str) -> Option<String> {
    let re = TITLE_RE.as_ref()?;
    let title = decode_entities(re.captures(html)?.get(1)?.as_str().trim());
    (!title.is_empty()).then_some(title)
}

/// Tag-stripping HTML to text conversion that drops non-content sections (pure function)
pub fn html_to_text(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut tag_name = String::new();
    let mut skip_depth = 0usize;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag_name.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let raw = tag_name.trim().to_lowercase();
                let closing = raw.starts_with('/');
                let name: String = raw
                    .trim_start_matches('/')
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect();

                if SKIPPED_TAGS.contains(&name.as_str()) && !raw.ends_with('/') {
                    if closing {
                        skip_depth = skip_depth.saturating_sub(1);
                    } else {
                        skip_depth += 1;
                    }
                }

                if matches!(
                    name.as_str(),
                    "div" | "p" | "br" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "tr"
                        | "section" | "article"
                ) {
                    result.push('\n');
                }
                tag_name.clear();
            }
            _ if in_tag => tag_name.push(ch),
            _ if skip_depth > 0 => {}
            _ if ch.is_whitespace() => {
                if !result.ends_with(' ') && !result.ends_with('\n') {
                    result.push(' ');
                }
            }
            _ => result.push(ch),
        }
    }

    let text = result
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
