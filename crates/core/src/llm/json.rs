use crate::domain::contract::LlmSentiment;
use anyhow::Context;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Reads a sentiment score from free-form model output: a `{"score": ..}` object, possibly
/// fenced or surrounded by prose, or a bare number.
pub fn parse_sentiment(text: &str) -> anyhow::Result<f64> {
    if let Ok(score) = text.trim().parse::<f64>() {
        return LlmSentiment { score }.validate();
    }
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmSentiment>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON for sentiment schema: {json_str}"))?;
    parsed.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let body = "{\"score\":0.4}";
        let fenced = format!("```json\n{body}\n```\n");
        assert_eq!(extract_json(&fenced), Some(body.to_string()));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let s = "prefix {\"a\":1} suffix";
        assert_eq!(extract_json(s), Some("{\"a\":1}".to_string()));
    }

    #[test]
    fn parse_sentiment_accepts_object_with_prose() {
        let text = "Here is the score: {\"score\": -0.35} as requested.";
        assert_eq!(parse_sentiment(text).unwrap(), -0.35);
    }

    #[test]
    fn parse_sentiment_accepts_bare_number() {
        assert_eq!(parse_sentiment(" 0.8\n").unwrap(), 0.8);
    }

    #[test]
    fn parse_sentiment_rejects_garbage() {
        assert!(parse_sentiment("I cannot tell.").is_err());
        assert!(parse_sentiment("{\"sentiment\": \"positive\"}").is_err());
    }
}
