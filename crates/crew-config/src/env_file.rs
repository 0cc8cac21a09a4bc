//! Flat `KEY=VALUE` env-file parsing.

use std::collections::HashMap;

/// Parse env-file content into key/value pairs.
///
/// Rules:
/// - blank lines and lines starting with `#` are ignored
/// - an optional leading `export ` is stripped
/// - values may be single- or double-quoted; quotes are removed
/// - unquoted values lose a trailing ` # comment`
/// - later occurrences of a key win
/// - unknown keys are preserved (callers ignore what they don't recognize)
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() || !is_valid_key(key) {
            continue;
        }

        values.insert(key.to_string(), clean_value(value.trim()));
    }

    values
}

fn is_valid_key(key: &str) -> bool {
    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn clean_value(value: &str) -> String {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return value[1..value.len() - 1].to_string();
        }
    }

    // Unquoted: strip a trailing comment introduced by whitespace + '#'.
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}
