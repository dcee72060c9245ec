use serde_json::Value;

/// Top-level report fields that carry free-form prose. These are the only
/// places the repair pass will touch: the engine is instructed to emit JSON
/// but its narrative text legally contains quotes it forgot to escape.
pub const NARRATIVE_FIELDS: &[&str] = &[
    "market_summary",
    "commentary",
    "risk_notes",
    "assessment",
    "lesson",
];

/// Best-effort structured parse of the engine's final text.
///
/// Tier 1: extract the JSON payload (fenced block, else outer braces) and
/// parse it strictly. Tier 2: re-escape quotes inside the narrative fields
/// and retry. `None` means both tiers failed and the caller should wrap the
/// raw text itself — extraction never escalates to a job error.
pub fn parse_lenient(raw: &str) -> Option<Value> {
    let payload = extract_json_block(raw)?;

    if let Ok(value) = serde_json::from_str::<Value>(&payload) {
        return Some(value);
    }

    let repaired = escape_narrative_quotes(&payload, NARRATIVE_FIELDS);
    serde_json::from_str(&repaired).ok()
}

/// Pull the JSON object out of surrounding prose. A ```json fence wins;
/// otherwise take the substring from the first `{` to the last `}`.
pub fn extract_json_block(raw: &str) -> Option<String> {
    if let Some(start) = raw.find("```json") {
        if let Some(end) = raw[start + 7..].find("```") {
            let fenced = raw[start + 7..start + 7 + end].trim();
            if fenced.starts_with('{') && fenced.ends_with('}') {
                return Some(fenced.to_string());
            }
        }
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

/// Escape unescaped quote characters inside the values of the given string
/// fields. The closing quote of a value is taken to be the first unescaped
/// quote followed (after whitespace) by `,` or `}`; every quote before it is
/// treated as embedded prose.
pub fn escape_narrative_quotes(input: &str, fields: &[&str]) -> String {
    let mut text = input.to_string();
    for field in fields {
        text = escape_field(&text, field);
    }
    text
}

fn escape_field(input: &str, field: &str) -> String {
    let key = format!("\"{field}\"");
    let Some(key_pos) = input.find(&key) else {
        return input.to_string();
    };

    let bytes = input.as_bytes();
    let mut i = key_pos + key.len();
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b':' {
        return input.to_string();
    }
    i += 1;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'"' {
        // Not a string value; nothing to repair here
        return input.to_string();
    }

    let value_start = i + 1;
    let mut embedded: Vec<usize> = Vec::new();
    let mut j = value_start;
    let mut closed = false;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 1,
            b'"' => {
                let mut k = j + 1;
                while k < bytes.len() && bytes[k].is_ascii_whitespace() {
                    k += 1;
                }
                if k >= bytes.len() || bytes[k] == b',' || bytes[k] == b'}' {
                    closed = true;
                    break;
                }
                embedded.push(j);
            }
            _ => {}
        }
        j += 1;
    }

    if !closed || embedded.is_empty() {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len() + embedded.len());
    let mut last = 0;
    for &pos in &embedded {
        out.push_str(&input[last..pos]);
        out.push_str("\\\"");
        last = pos + 1;
    }
    out.push_str(&input[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_fenced_block() {
        let raw = "Here is the report:\n```json\n{\"confidence\": \"high\"}\n```\nDone.";
        assert_eq!(extract_json_block(raw).unwrap(), "{\"confidence\": \"high\"}");
    }

    #[test]
    fn test_extract_outer_braces_with_prose() {
        let raw = "Sure, here it is: {\"confidence\": \"high\"} hope that helps!";
        assert_eq!(extract_json_block(raw).unwrap(), "{\"confidence\": \"high\"}");
    }

    #[test]
    fn test_fence_and_braces_agree() {
        let object = "{\"signals\": [], \"confidence\": \"low\"}";
        let fenced = format!("```json\n{object}\n```");
        let prosed = format!("Leading sentence. {object} Trailing sentence.");
        let a: Value = serde_json::from_str(&extract_json_block(&fenced).unwrap()).unwrap();
        let b: Value = serde_json::from_str(&extract_json_block(&prosed).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extract_no_object() {
        assert!(extract_json_block("no braces here").is_none());
        assert!(extract_json_block("} backwards {").is_none());
    }

    #[test]
    fn test_repair_embedded_quote_preserved() {
        let broken = r#"{"commentary": "The desk said "stay flat" overnight", "confidence": "low"}"#;
        let value = parse_lenient(broken).unwrap();
        assert_eq!(
            value["commentary"].as_str().unwrap(),
            r#"The desk said "stay flat" overnight"#
        );
        assert_eq!(value["confidence"], "low");
    }

    #[test]
    fn test_repair_leaves_valid_json_alone() {
        let valid = r#"{"market_summary": "quiet session", "signals": []}"#;
        let value = parse_lenient(valid).unwrap();
        assert_eq!(value, json!({"market_summary": "quiet session", "signals": []}));
    }

    #[test]
    fn test_repair_skips_already_escaped_quotes() {
        let valid = r#"{"lesson": "they said \"hold\"", "grade": "B"}"#;
        let value = parse_lenient(valid).unwrap();
        assert_eq!(value["lesson"].as_str().unwrap(), r#"they said "hold""#);
    }

    #[test]
    fn test_repair_ignores_non_string_value() {
        let input = r#"{"commentary": 42}"#;
        assert_eq!(escape_narrative_quotes(input, NARRATIVE_FIELDS), input);
    }

    #[test]
    fn test_both_tiers_fail() {
        assert!(parse_lenient("plain text reply, no json at all").is_none());
        assert!(parse_lenient("{definitely [not json").is_none());
    }

    #[test]
    fn test_lenient_parse_through_fence() {
        let raw = "```json\n{\"assessment\": \"clean exit\", \"grade\": \"A\"}\n```";
        let value = parse_lenient(raw).unwrap();
        assert_eq!(value["grade"], "A");
    }
}
