//! Helpers for pulling structure out of free-form model replies.

use serde_json::Value;

/// The first JSON object in `text`, looking inside a fenced code block
/// first.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let candidate = fenced_block(text).unwrap_or(text);
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&candidate[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let body_start = open + 3 + text[open + 3..].find('\n')? + 1;
    let close = text[body_start..].find("```")? + body_start;
    Some(&text[body_start..close])
}

/// Strip a list marker (`1.`, `2)`, `-`, `*`, `•`) from `line`.
pub fn strip_list_marker(line: &str) -> Option<&str> {
    let line = line.trim();
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))
        .map(str::trim)
}

/// Every list item in `text`, in order.
pub fn list_items(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(strip_list_marker)
        .filter(|item| !item.is_empty())
        .map(|item| item.trim_matches('*').trim().to_string())
        .collect()
}

/// A `label: N/10` style rating anywhere in `text`.
///
/// Matches case-insensitively and tolerates markdown emphasis around the
/// label. Ratings outside [0, 10] are ignored.
pub fn rating(text: &str, label: &str) -> Option<f64> {
    let label = label.to_lowercase();
    text.lines().find_map(|line| {
        let lower = line.to_lowercase();
        let at = lower.find(&label)?;
        let after = &lower[at + label.len()..];
        let start = after.find(|c: char| c.is_ascii_digit())?;
        let number: String = after[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let value: f64 = number.trim_end_matches('.').parse().ok()?;
        (0.0..=10.0).contains(&value).then_some(value)
    })
}

fn heading_name(line: &str) -> Option<String> {
    let trimmed = line.trim().trim_start_matches('#').trim().trim_matches('*').trim();
    let name = trimmed.strip_suffix(':')?.trim().trim_matches('*').trim();
    (!name.is_empty()).then(|| name.to_lowercase())
}

/// List items under the heading `heading` (e.g. `Strengths:`), up to the
/// next heading.
pub fn section_items(text: &str, heading: &str) -> Vec<String> {
    let heading = heading.to_lowercase();
    let mut inside = false;
    let mut items = Vec::new();
    for line in text.lines() {
        if let Some(name) = heading_name(line) {
            inside = name == heading;
            continue;
        }
        if inside
            && let Some(item) = strip_list_marker(line)
            && !item.is_empty()
        {
            items.push(item.to_string());
        }
    }
    items
}

/// Word count that treats each CJK character as a word.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .map(|word| {
            let wide = word.chars().filter(|c| !c.is_ascii() && c.is_alphabetic()).count();
            if wide > 1 { wide } else { 1 }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_object() {
        let fenced = "Here is the plan:\n```json\n{\"steps\": [\"a\"]}\n```\nDone.";
        assert_eq!(extract_json_object(fenced), Some(json!({"steps": ["a"]})));

        let bare = "Plan {\"title\": \"Act I\"} end";
        assert_eq!(extract_json_object(bare), Some(json!({"title": "Act I"})));

        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{broken").is_none());
    }

    #[test]
    fn test_list_items() {
        let text = "Intro line\n1. First\n2) Second\n- Third\n* **Fourth**\n10. Tenth\nNot 5 a list";
        assert_eq!(
            list_items(text),
            vec!["First", "Second", "Third", "Fourth", "Tenth"]
        );
    }

    #[test]
    fn test_rating() {
        assert_eq!(rating("**Score:** 7.5/10", "score"), Some(7.5));
        assert_eq!(rating("Overall SCORE: 8 / 10", "score"), Some(8.0));
        assert_eq!(rating("Engagement - 6.", "engagement"), Some(6.0));
        assert_eq!(rating("Score: 42", "score"), None);
        assert_eq!(rating("No numbers", "score"), None);
    }

    #[test]
    fn test_section_items() {
        let text = "Score: 7/10\n\nStrengths:\n- vivid setting\n- tight pacing\n\n## Weaknesses:\n- flat dialogue\n";
        assert_eq!(
            section_items(text, "strengths"),
            vec!["vivid setting", "tight pacing"]
        );
        assert_eq!(section_items(text, "Weaknesses"), vec!["flat dialogue"]);
        assert!(section_items(text, "suggestions").is_empty());
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("The storm broke at dawn."), 5);
        assert_eq!(word_count("风暴来了"), 4);
        assert_eq!(word_count(""), 0);
    }
}
