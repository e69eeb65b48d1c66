use serde_json::Value;

/// Extracts the first well-formed JSON object from a completion response.
///
/// Services are asked for strict JSON but routinely wrap it in prose or
/// fenced code blocks. Three strategies are tried in order: a direct parse,
/// the body of the first fenced block, and a balanced-brace scan over the
/// raw text. The scan tracks string and escape state so braces inside JSON
/// strings cannot split a candidate.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let Some(value) = parse_fenced_block(trimmed) {
        return Some(value);
    }

    scan_balanced_objects(trimmed)
}

/// Tries the body of the first ``` fenced block, dropping an optional
/// language tag line.
fn parse_fenced_block(text: &str) -> Option<Value> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let end = rest.find("```")?;
    let mut body = &rest[..end];

    if let Some(newline) = body.find('\n') {
        let first_line = &body[..newline];
        if !first_line.contains('{') {
            body = &body[newline + 1..];
        }
    }

    match serde_json::from_str::<Value>(body.trim()) {
        Ok(value) if value.is_object() => Some(value),
        _ => None,
    }
}

/// Walks the text looking for balanced `{…}` spans and returns the first
/// one that parses as an object.
fn scan_balanced_objects(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            let candidate = &text[open..=close];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
        start = open + 1;
    }

    None
}

/// Index of the brace closing the one at `open`, honoring string literals.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
