use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::FmtCompact as _;

const LOG_TARGET: &str = "hntldr::article";

const ALWAYS_SKIP_HOSTS: &[&str] = &[
    "twitter.com",
    "x.com",
    "youtube.com",
    "youtu.be",
    "reddit.com",
    "news.ycombinator.com",
];

const GITHUB_SKIP_ACTIONS: &[&str] = &[
    "tree", "issues", "pull", "pulls", "actions", "releases", "commits", "commit", "compare",
];

/// Whether a link is not worth scraping for article text
pub fn should_skip_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let Some(host) = parsed.host_str().map(str::to_lowercase) else {
        return true;
    };
    let path = parsed.path().trim_end_matches('/');

    if ALWAYS_SKIP_HOSTS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    {
        return true;
    }

    if host.contains("arxiv.org") && path.starts_with("/abs/") {
        return true;
    }

    if host == "github.com" {
        if path.starts_with("/blog") {
            return false;
        }
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        // user pages and repo roots carry no prose
        if parts.len() <= 2 {
            return true;
        }
        return match parts[2] {
            "blob" => !path.ends_with(".md"),
            action => GITHUB_SKIP_ACTIONS.contains(&action),
        };
    }

    false
}

/// Pull readable paragraph text out of an HTML page.
///
/// Prefers `<article>` paragraphs and falls back to every `<p>` on the page.
pub fn extract_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);

    let mut paragraphs = Vec::new();
    for selector in ["article p", "p"] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        paragraphs = document
            .select(&selector)
            .map(|p| p.text().collect::<Vec<_>>().join(" "))
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .collect();
        if !paragraphs.is_empty() {
            break;
        }
    }

    paragraphs.join("\n\n").chars().take(max_chars).collect()
}

pub struct ArticleExtractor {
    client: Client,
    max_chars: usize,
}

impl ArticleExtractor {
    pub fn new(client: Client, max_chars: usize) -> Self {
        Self { client, max_chars }
    }

    /// Fetch `url` and extract its text. Any failure yields an empty string;
    /// synthesis then works from the title alone.
    pub async fn fetch_text(&self, url: &str) -> String {
        if should_skip_url(url) {
            debug!(target: LOG_TARGET, %url, "Skipping article scrape");
            return String::new();
        }

        let html = match self.fetch_html(url).await {
            Ok(html) => html,
            Err(err) => {
                debug!(target: LOG_TARGET, %url, err = %err.fmt_compact(), "Article fetch failed");
                return String::new();
            }
        };

        extract_text(&html, self.max_chars)
    }

    async fn fetch_html(&self, url: &str) -> Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_rules() {
        assert!(should_skip_url(""));
        assert!(should_skip_url("https://x.com/someone/status/1"));
        assert!(should_skip_url("https://m.youtube.com/watch?v=abc"));
        assert!(should_skip_url("https://news.ycombinator.com/item?id=1"));
        assert!(should_skip_url("https://arxiv.org/abs/2401.00001"));
        assert!(!should_skip_url("https://arxiv.org/pdf/2401.00001"));

        assert!(should_skip_url("https://github.com/rust-lang"));
        assert!(should_skip_url("https://github.com/rust-lang/rust/"));
        assert!(should_skip_url("https://github.com/rust-lang/rust/tree/master/src"));
        assert!(should_skip_url("https://github.com/rust-lang/rust/issues/1"));
        assert!(should_skip_url("https://github.com/rust-lang/rust/blob/master/x.rs"));
        assert!(!should_skip_url("https://github.com/rust-lang/rust/blob/master/README.md"));
        assert!(!should_skip_url("https://github.com/blog/2024-some-post"));
        assert!(!should_skip_url("https://rust-lang.github.io/book/"));
        assert!(!should_skip_url("https://gist.github.com/a/b"));
        assert!(!should_skip_url("https://example.com/post"));
    }

    #[test]
    fn extracts_article_paragraphs_first() {
        let html = r#"<html><body>
            <p>Cookie banner</p>
            <article><p>First   paragraph.</p><p>Second <b>bold</b> one.</p></article>
        </body></html>"#;
        assert_eq!(
            extract_text(html, 1000),
            "First paragraph.\n\nSecond bold one."
        );
    }

    #[test]
    fn falls_back_to_all_paragraphs_and_truncates() {
        let html = "<html><body><div><p>Hello world</p></div></body></html>";
        assert_eq!(extract_text(html, 5), "Hello");
        assert_eq!(extract_text("<html><body>no paragraphs</body></html>", 100), "");
    }
}
