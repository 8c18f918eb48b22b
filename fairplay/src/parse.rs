//! Parsing of raw model output into JSON payloads.
//!
//! Strategies are tried in order: strict JSON, JSON repair (fence stripping,
//! outermost-object extraction, trailing-comma removal, bracket/quote
//! recovery), then YAML with a post-processing pass that strips trailing
//! inline text after quoted scalars. For any valid JSON object all three
//! strategies agree, so downstream code never depends on which one fired.

use serde_json::Value;

/// All strategies failed; carries one line per attempted strategy.
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub attempts: Vec<String>,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "all parse strategies failed: {}", self.attempts.join("; "))
    }
}

impl std::error::Error for ParseFailure {}

/// Parse raw LLM output into a JSON value.
pub fn parse_payload(raw: &str) -> Result<Value, ParseFailure> {
    let mut attempts = Vec::new();

    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => return Ok(v),
        Err(e) => attempts.push(format!("strict json: {e}")),
    }

    match repair_json(trimmed) {
        Ok(v) => return Ok(v),
        Err(e) => attempts.push(format!("json repair: {e}")),
    }

    match yaml_fallback(trimmed) {
        Ok(v) => return Ok(v),
        Err(e) => attempts.push(format!("yaml: {e}")),
    }

    Err(ParseFailure { attempts })
}

// ── JSON repair ─────────────────────────────────────────────────────

fn repair_json(raw: &str) -> Result<Value, String> {
    let unfenced = strip_code_fences(raw);
    let candidate = extract_outer_object(&unfenced).ok_or("no JSON object found")?;
    let cleaned = strip_trailing_commas(&candidate);
    serde_json::from_str(&cleaned).map_err(|e| e.to_string())
}

/// Remove a leading/trailing markdown fence if present.
fn strip_code_fences(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if lines.first().map(|l| l.trim_start().starts_with("```")) == Some(true) {
        lines.remove(0);
    }
    if lines.last().map(|l| l.trim_start().starts_with("```")) == Some(true) {
        lines.pop();
    }
    lines.join("\n")
}

/// Extract the outermost `{...}` span, closing unbalanced brackets and an
/// unterminated string when the output was truncated mid-payload.
fn extract_outer_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let body = &raw[start..];

    let mut stack: Vec<char> = Vec::new();
    let mut in_str = false;
    let mut escape = false;
    let mut end = None;

    for (i, c) in body.char_indices() {
        if in_str {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_str = false;
            }
            continue;
        }
        match c {
            '"' => in_str = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                    if stack.is_empty() {
                        end = Some(i);
                        break;
                    }
                } else {
                    // Mismatched closer; give up on balanced extraction.
                    return None;
                }
            }
            _ => {}
        }
    }

    match end {
        Some(i) => Some(body[..=i].to_string()),
        None => {
            // Truncated output: close the string and every open delimiter.
            let mut repaired = body.trim_end().trim_end_matches(',').to_string();
            if in_str {
                repaired.push('"');
            }
            while let Some(closer) = stack.pop() {
                repaired.push(closer);
            }
            Some(repaired)
        }
    }
}

/// Drop commas that directly precede a closing bracket. A no-op on valid
/// JSON, which never contains them.
fn strip_trailing_commas(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_str = false;
    let mut escape = false;
    let chars: Vec<char> = raw.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_str {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_str = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_str = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

// ── YAML fallback ───────────────────────────────────────────────────

fn yaml_fallback(raw: &str) -> Result<Value, String> {
    let unfenced = strip_code_fences(raw);
    match yaml_to_json(&unfenced) {
        Ok(v) => Ok(v),
        Err(first) => {
            // Models sometimes append commentary after a quoted scalar;
            // strip it line by line and retry once.
            let sanitized = strip_after_quoted_scalars(&unfenced);
            if sanitized == unfenced {
                Err(first)
            } else {
                yaml_to_json(&sanitized)
            }
        }
    }
}

fn yaml_to_json(raw: &str) -> Result<Value, String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
    if yaml.is_null() {
        return Err("empty document".into());
    }
    serde_json::to_value(&yaml).map_err(|e| e.to_string())
}

/// For lines of the form `key: "value" trailing commentary`, keep only the
/// quoted scalar.
fn strip_after_quoted_scalars(raw: &str) -> String {
    let mut out = Vec::new();
    for line in raw.lines() {
        out.push(strip_line(line));
    }
    out.join("\n")
}

fn strip_line(line: &str) -> String {
    let Some(colon) = line.find(':') else {
        return line.to_string();
    };
    let after = &line[colon + 1..];
    let trimmed = after.trim_start();
    if !trimmed.starts_with('"') {
        return line.to_string();
    }
    // Find the closing quote of the scalar.
    let mut escape = false;
    for (i, c) in trimmed.char_indices().skip(1) {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => {
                let tail = trimmed[i + 1..].trim();
                if tail.is_empty() || tail == "," {
                    return line.to_string();
                }
                let prefix_len = line.len() - after.len() + (after.len() - trimmed.len());
                return format!("{}{}", &line[..prefix_len], &trimmed[..=i]);
            }
            _ => {}
        }
    }
    line.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VALID: &str = r#"{"decade": "1930s", "anchors": ["wireless", "bell-pull"], "n": 3}"#;

    #[test]
    fn test_strict_json() {
        let v = parse_payload(VALID).unwrap();
        assert_eq!(v["decade"], json!("1930s"));
    }

    #[test]
    fn test_parser_strategies_agree_on_valid_json() {
        let strict: Value = serde_json::from_str(VALID).unwrap();
        let repaired = repair_json(VALID).unwrap();
        let yaml = yaml_fallback(VALID).unwrap();
        assert_eq!(strict, repaired);
        assert_eq!(strict, yaml);
    }

    #[test]
    fn test_fenced_json() {
        let raw = format!("```json\n{VALID}\n```");
        let v = parse_payload(&raw).unwrap();
        assert_eq!(v["n"], json!(3));
    }

    #[test]
    fn test_surrounding_prose_stripped() {
        let raw = format!("Here is the artifact you asked for:\n{VALID}\nLet me know!");
        let v = parse_payload(&raw).unwrap();
        assert_eq!(v["decade"], json!("1930s"));
    }

    #[test]
    fn test_trailing_commas_repaired() {
        let raw = r#"{"a": [1, 2, 3,], "b": {"c": 1,},}"#;
        let v = parse_payload(raw).unwrap();
        assert_eq!(v, json!({"a": [1, 2, 3], "b": {"c": 1}}));
    }

    #[test]
    fn test_truncated_output_recovered() {
        let raw = r#"{"a": {"b": [1, 2], "c": "unterminat"#;
        let v = parse_payload(raw).unwrap();
        assert_eq!(v["a"]["b"], json!([1, 2]));
        assert!(v["a"]["c"].is_string());
    }

    #[test]
    fn test_comma_inside_string_preserved() {
        let raw = r#"{"a": "one, two,]", "b": 1}"#;
        let v = parse_payload(raw).unwrap();
        assert_eq!(v["a"], json!("one, two,]"));
    }

    #[test]
    fn test_yaml_fallback() {
        let raw = "decade: \"1930s\"\ncast_size: 6\nanchors:\n  - wireless\n  - bell-pull\n";
        let v = parse_payload(raw).unwrap();
        assert_eq!(v["cast_size"], json!(6));
        assert_eq!(v["anchors"][1], json!("bell-pull"));
    }

    #[test]
    fn test_yaml_trailing_commentary_stripped() {
        let raw = "decade: \"1930s\" as requested by the brief\ntone: \"Cozy\"\n";
        let v = parse_payload(raw).unwrap();
        assert_eq!(v["decade"], json!("1930s"));
        assert_eq!(v["tone"], json!("Cozy"));
    }

    #[test]
    fn test_all_strategies_fail() {
        let err = parse_payload(": : : [unparseable {{{{ ::").unwrap_err();
        assert_eq!(err.attempts.len(), 3);
        assert!(err.to_string().contains("all parse strategies failed"));
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(parse_payload("").is_err());
    }
}
