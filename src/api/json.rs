//! JSON decoding with error context for API response bodies.

use anyhow::Result;

/// Decode `body` as `T`. On failure the error names the serde path, the
/// expected/actual types, and shows a short snippet around the failing column.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let jd = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(jd).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let msg = inner.to_string();
        let loc = format!(" at line {line} column {column}");
        let msg = msg.strip_suffix(&loc).unwrap_or(&msg);

        let mut out = String::new();
        if !path.is_empty() && path != "." {
            out.push_str(&format!("at path '{path}': "));
        }
        out.push_str(&format!(
            "{} (line {line} col {column})\n{}",
            describe_mismatch(msg),
            snippet(body, line, column, 20)
        ));
        anyhow::anyhow!(out)
    })
}

/// Rewrites "invalid type: X, expected Y" as "expected Y, got X".
fn describe_mismatch(msg: &str) -> String {
    if let Some(rest) = msg.split_once("invalid type: ").map(|(_, r)| r)
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {actual}", expected.trim());
    }
    msg.to_string()
}

fn snippet(body: &str, line: usize, column: usize, context_len: usize) -> String {
    let target: Vec<char> = body
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .chars()
        .collect();
    if target.is_empty() {
        return "(empty line)".to_string();
    }

    let error_idx = column.saturating_sub(1).min(target.len() - 1);
    let half = context_len / 2;
    let start = error_idx.saturating_sub(half);
    let end = (error_idx + half).min(target.len());

    let slice: String = target[start..end].iter().collect();
    let indicator = " ".repeat(error_idx - start) + "^";
    format!("...{slice}...\n   {indicator}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::ObservationPage;

    #[test]
    fn test_describe_mismatch_invalid_type() {
        assert_eq!(
            describe_mismatch("invalid type: null, expected u32"),
            "expected u32, got null"
        );
    }

    #[test]
    fn test_describe_mismatch_passthrough() {
        assert_eq!(describe_mismatch("EOF while parsing"), "EOF while parsing");
    }

    #[test]
    fn test_observation_page_null_count_reports_path() {
        let body = r#"{"data": [], "totalEntityCount": null, "pageLength": 50}"#;
        let err = parse_json_with_context::<ObservationPage>(body)
            .unwrap_err()
            .to_string();
        assert!(err.contains("totalEntityCount"), "{err}");
        assert!(err.contains("got null"), "{err}");
    }

    #[test]
    fn test_snippet_handles_multibyte_lines() {
        let body = "{\"name\": \"Müller—Straße\", \"x\": ?}";
        let out = snippet(body, 1, 33, 20);
        assert!(out.contains('^'));
    }
}
