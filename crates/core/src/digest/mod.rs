//! Short human-readable digest of a ticker's articles.

use crate::domain::article::{truncate_chars, Article};
use crate::error::CollaboratorError;
use crate::retry::with_timeout;
use std::sync::Arc;
use std::time::Duration;

pub const EMPTY_DIGEST: &str = "No recent news available.";

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, texts: &[String], max_length: usize)
        -> Result<String, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct DigestOptions {
    /// Character budget for everything sent to the summarizer.
    pub max_input_chars: usize,
    /// Per-article cap on body characters (fetched content or snippet).
    pub snippet_chars: usize,
    /// Requested summary length, in words.
    pub summary_max_length: usize,
    /// Titles listed by the fallback digest.
    pub fallback_titles: usize,
    pub call_timeout: Duration,
}

impl Default for DigestOptions {
    fn default() -> Self {
        Self {
            max_input_chars: 4000,
            snippet_chars: 500,
            summary_max_length: 150,
            fallback_titles: 5,
            call_timeout: Duration::from_secs(45),
        }
    }
}

pub struct DigestGenerator {
    summarizer: Arc<dyn Summarizer>,
    opts: DigestOptions,
}

impl DigestGenerator {
    pub fn new(summarizer: Arc<dyn Summarizer>, opts: DigestOptions) -> Self {
        Self { summarizer, opts }
    }

    /// `articles` must be ordered newest first.
    pub async fn summarize(&self, ticker: &str, articles: &[Article]) -> String {
        if articles.is_empty() {
            return EMPTY_DIGEST.to_string();
        }

        let inputs = self.budget_inputs(articles);
        let res = with_timeout(
            self.opts.call_timeout,
            "summarization",
            self.summarizer.summarize(&inputs, self.opts.summary_max_length),
        )
        .await;

        match res.map(|s| clean_summary(&s)) {
            Ok(summary) if !summary.is_empty() => {
                tracing::info!(ticker, inputs = inputs.len(), chars = summary.len(), "generated digest");
                summary
            }
            Ok(_) => {
                tracing::warn!(ticker, "summarizer returned empty text; using title digest");
                self.fallback_digest(articles)
            }
            Err(err) => {
                tracing::warn!(ticker, error = %err, "summarization failed; using title digest");
                self.fallback_digest(articles)
            }
        }
    }

    /// Summarizer inputs, newest first, stopping before the budget would be exceeded.
    pub fn budget_inputs(&self, articles: &[Article]) -> Vec<String> {
        let mut used = 0usize;
        let mut out = Vec::new();
        for article in articles {
            let text = match article.body() {
                Some(body) => format!(
                    "{}: {}",
                    article.title.trim(),
                    truncate_chars(body, self.opts.snippet_chars)
                ),
                None => article.title.trim().to_string(),
            };
            let len = text.chars().count();
            if used + len > self.opts.max_input_chars {
                break;
            }
            used += len;
            out.push(text);
        }
        // Always send at least the newest article, cut to the budget.
        if out.is_empty() {
            if let Some(first) = articles.first() {
                out.push(truncate_chars(first.title.trim(), self.opts.max_input_chars).to_string());
            }
        }
        out
    }

    pub fn fallback_digest(&self, articles: &[Article]) -> String {
        title_digest(articles, self.opts.fallback_titles)
    }
}

/// Bullet list of the first `limit` titles.
pub fn title_digest(articles: &[Article], limit: usize) -> String {
    let lines: Vec<String> = articles
        .iter()
        .map(|a| a.title.trim())
        .filter(|t| !t.is_empty())
        .take(limit)
        .map(|t| format!("• {t}"))
        .collect();
    if lines.is_empty() {
        EMPTY_DIGEST.to_string()
    } else {
        lines.join("\n")
    }
}

/// Tidies model output: collapses whitespace, removes spaces before punctuation and adds a
/// space after sentence punctuation glued to the next word.
pub fn clean_summary(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = collapsed.chars().collect();
    let mut out = String::with_capacity(collapsed.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ' ' && chars.get(i + 1).is_some_and(|n| is_punct(*n)) {
            continue;
        }
        out.push(c);
        if matches!(c, '.' | '!' | '?' | ';' | ',')
            && chars.get(i + 1).is_some_and(|n| n.is_uppercase())
        {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

fn is_punct(c: char) -> bool {
    matches!(c, '.' | ',' | '!' | '?' | ';' | ':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{article, FakeSummarizer};

    fn generator(summarizer: FakeSummarizer, opts: DigestOptions) -> DigestGenerator {
        DigestGenerator::new(Arc::new(summarizer), opts)
    }

    #[test]
    fn clean_summary_fixes_spacing() {
        assert_eq!(
            clean_summary("  Shares rose .Analysts   expect more ,  growth  "),
            "Shares rose. Analysts expect more, growth"
        );
    }

    #[test]
    fn title_digest_lists_top_titles() {
        let articles: Vec<_> = (1..=7).map(|i| article(&format!("t{i}"))).collect();
        assert_eq!(title_digest(&articles, 3), "• t1\n• t2\n• t3");
        assert_eq!(title_digest(&[], 3), EMPTY_DIGEST);
    }

    #[test]
    fn budget_keeps_newest_and_drops_the_rest() {
        let mut articles: Vec<_> = (1..=4).map(|i| article(&format!("headline {i}"))).collect();
        articles[0].snippet = Some("x".repeat(40));
        let gen = generator(
            FakeSummarizer::ok("s"),
            DigestOptions {
                max_input_chars: 70,
                ..DigestOptions::default()
            },
        );
        let inputs = gen.budget_inputs(&articles);
        // "headline 1: " + 40 = 52, "headline 2" = 10, next would exceed 70.
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].starts_with("headline 1: x"));
        assert_eq!(inputs[1], "headline 2");
    }

    #[test]
    fn budget_truncates_snippets() {
        let mut a = article("title");
        a.snippet = Some("y".repeat(900));
        let gen = generator(FakeSummarizer::ok("s"), DigestOptions::default());
        let inputs = gen.budget_inputs(&[a]);
        assert_eq!(inputs[0].chars().count(), "title: ".len() + 500);
    }

    #[test]
    fn budget_prefers_fetched_content() {
        let mut a = article("title");
        a.snippet = Some("teaser".to_string());
        a.content = Some("the whole story".to_string());
        let gen = generator(FakeSummarizer::ok("s"), DigestOptions::default());
        assert_eq!(gen.budget_inputs(&[a]), vec!["title: the whole story".to_string()]);
    }

    #[tokio::test]
    async fn uses_summarizer_output() {
        let gen = generator(FakeSummarizer::ok("Demand  stays strong ."), DigestOptions::default());
        let digest = gen.summarize("NVDA", &[article("a")]).await;
        assert_eq!(digest, "Demand stays strong.");
    }

    #[tokio::test]
    async fn falls_back_to_titles_on_failure() {
        let gen = generator(FakeSummarizer::failing(), DigestOptions::default());
        let digest = gen.summarize("NVDA", &[article("first"), article("second")]).await;
        assert_eq!(digest, "• first\n• second");
    }

    #[tokio::test]
    async fn empty_output_falls_back() {
        let gen = generator(FakeSummarizer::ok("   "), DigestOptions::default());
        assert_eq!(gen.summarize("NVDA", &[article("only")]).await, "• only");
    }

    #[tokio::test]
    async fn no_articles_skip_summarizer() {
        let summarizer = FakeSummarizer::failing();
        let handle = summarizer.clone();
        let gen = generator(summarizer, DigestOptions::default());
        assert_eq!(gen.summarize("NVDA", &[]).await, EMPTY_DIGEST);
        assert_eq!(handle.calls(), 0);
    }
}
