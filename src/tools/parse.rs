/// Return the body of the first fenced code block, or the trimmed input when
/// there is no fence. An unclosed fence runs to the end of the text.
pub fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    // Skip the opening fence line (```python, ```py, ...).
    let after_fence = &trimmed[start + 3..];
    let body = match after_fence.find('\n') {
        Some(nl) => &after_fence[nl + 1..],
        None => return String::new(),
    };
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim_end().to_string()
}

/// Candidate names mentioned in `text` as whole words, ordered by first
/// appearance. Matching ignores case; word characters are alphanumerics and `_`.
pub fn mentioned_names<'a>(text: &str, candidates: &[&'a str]) -> Vec<&'a str> {
    let lower = text.to_lowercase();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut hits: Vec<(usize, &'a str)> = Vec::new();
    for &name in candidates {
        let needle = name.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        let mut from = 0;
        while let Some(found) = lower[from..].find(&needle) {
            let at = from + found;
            let end = at + needle.len();
            let before_ok = lower[..at].chars().next_back().is_none_or(|c| !is_word(c));
            let after_ok = lower[end..].chars().next().is_none_or(|c| !is_word(c));
            if before_ok && after_ok {
                hits.push((at, name));
                break;
            }
            from = end;
        }
    }
    hits.sort_by_key(|(at, _)| *at);
    hits.into_iter().map(|(_, name)| name).collect()
}
