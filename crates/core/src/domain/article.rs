use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One news item as returned by a source. Lives for a single cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub snippet: Option<String>,
    /// Extracted page body, when the article page could be fetched.
    #[serde(default)]
    pub content: Option<String>,
}

/// Two articles with the same key are the same story.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub title: String,
    pub day: NaiveDate,
}

impl Article {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            title: normalize_title(&self.title),
            day: self.published_at.date_naive(),
        }
    }

    /// Best available body text: the fetched content, else the snippet.
    pub fn body(&self) -> Option<&str> {
        fn non_blank(s: &Option<String>) -> Option<&str> {
            s.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        non_blank(&self.content).or_else(|| non_blank(&self.snippet))
    }

    /// Title followed by the body, if any.
    pub fn full_text(&self) -> String {
        match self.body() {
            Some(body) => format!("{}. {}", self.title.trim(), body),
            None => self.title.trim().to_string(),
        }
    }
}

pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cuts `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(title: &str, hour: u32) -> Article {
        Article {
            source: "wire".to_string(),
            title: title.to_string(),
            url: "https://example.com/a".to_string(),
            published_at: Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap(),
            snippet: None,
            content: None,
        }
    }

    #[test]
    fn normalize_title_lowercases_and_collapses_whitespace() {
        assert_eq!(
            normalize_title("  Nvidia   Beats\tEstimates \n Again "),
            "nvidia beats estimates again"
        );
    }

    #[test]
    fn same_story_same_day_shares_key() {
        let a = article("Tesla Recalls Model Y", 1);
        let b = article("tesla  recalls model y", 22);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn same_title_on_different_days_differs() {
        let a = article("Markets close higher", 10);
        let mut b = a.clone();
        b.published_at = Utc.with_ymd_and_hms(2026, 3, 3, 10, 0, 0).unwrap();
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn full_text_skips_blank_snippet() {
        let mut a = article("Headline", 1);
        a.snippet = Some("   ".to_string());
        assert_eq!(a.full_text(), "Headline");
        a.snippet = Some("Body text".to_string());
        assert_eq!(a.full_text(), "Headline. Body text");
    }

    #[test]
    fn fetched_content_wins_over_snippet() {
        let mut a = article("Headline", 1);
        a.snippet = Some("Teaser".to_string());
        a.content = Some("Full story body".to_string());
        assert_eq!(a.full_text(), "Headline. Full story body");
        a.content = Some(" ".to_string());
        assert_eq!(a.body(), Some("Teaser"));
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
