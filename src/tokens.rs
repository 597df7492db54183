// Local token estimator used for `estimated_input_tokens`, computed over a
// request's `total_text` independently of whatever the provider's own
// tokenizer would report. Heuristic, not exact: char/whitespace/punctuation
// weighting approximates common tokenizer behavior well enough for display
// and cost sanity-checks without pulling in a model-specific tokenizer.

pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }

    let char_count = text.chars().count() as f64;
    let whitespace_count = text.chars().filter(|c| c.is_whitespace()).count() as f64;
    let punctuation_count = text.chars().filter(|c| c.is_ascii_punctuation()).count() as f64;
    let digit_count = text.chars().filter(|c| c.is_ascii_digit()).count() as f64;
    let newline_count = text.chars().filter(|&c| c == '\n').count() as f64;

    let estimate = (char_count / 4.0)
        + (whitespace_count * 0.3)
        + (punctuation_count * 0.5)
        + (digit_count * 0.3)
        + (newline_count * 0.2);

    estimate.ceil().max(1.0) as u64
}

pub fn estimate_json_tokens(value: &serde_json::Value) -> u64 {
    let text = value.to_string();
    let base = estimate_tokens(&text) as f64;
    (base * 1.15).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn single_word() {
        assert!(estimate_tokens("hello") >= 1);
    }

    #[test]
    fn sentence_scales_with_length() {
        let short = estimate_tokens("hi");
        let long = estimate_tokens("this is a much longer sentence with more words in it");
        assert!(long > short);
    }

    #[test]
    fn json_overhead_applied() {
        let value = serde_json::json!({"a": 1, "b": "text"});
        let plain = estimate_tokens(&value.to_string());
        let json_tokens = estimate_json_tokens(&value);
        assert!(json_tokens >= plain);
    }
}
