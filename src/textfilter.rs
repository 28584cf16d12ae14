//! Markup transforms applied to source text before indexing.
//!
//! Two independent, order-sensitive passes: content expansion
//! (shortcodes, reusable-block references) first, markup stripping
//! second. Expanding after stripping would find nothing left to expand.

use std::collections::HashMap;

/// Strips HTML markup for indexing: script/style elements go with their
/// contents, comments and remaining tags are dropped, and the handful of
/// entities that appear in body text are decoded.
pub fn strip_html(input: &str) -> String {
    let without_blocks = strip_container_elements(input);
    let mut out = String::with_capacity(without_blocks.len());
    let mut chars = without_blocks.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '<' {
            let rest = &without_blocks[i..];
            if rest.starts_with("<!--") {
                // Comment: skip through the closing marker, or to end of
                // input when unterminated.
                let end = rest.find("-->").map(|p| i + p + 3);
                skip_until(&mut chars, end);
            } else {
                let end = rest.find('>').map(|p| i + p + 1);
                skip_until(&mut chars, end);
            }
        } else if c == '&' {
            let rest = &without_blocks[i..];
            if let Some((decoded, entity_len)) = decode_entity(rest) {
                out.push_str(decoded);
                skip_until(&mut chars, Some(i + entity_len));
            } else {
                out.push(c);
            }
        } else {
            out.push(c);
        }
    }

    out.trim().to_string()
}

/// Removes `<script>` and `<style>` elements together with their contents.
fn strip_container_elements(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    loop {
        let hit = ["<script", "<style"]
            .iter()
            .filter_map(|tag| find_ascii_ci(rest, tag).map(|p| (p, *tag)))
            .min_by_key(|(p, _)| *p);
        let Some((start, tag)) = hit else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        let close = if tag == "<script" {
            "</script>"
        } else {
            "</style>"
        };
        match find_ascii_ci(&rest[start..], close) {
            Some(p) => rest = &rest[start + p + close.len()..],
            None => return out,
        }
    }
}

/// Byte-position of `needle` in `haystack`, ASCII-case-insensitively.
/// Tag names are ASCII, so byte positions stay valid char boundaries.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn skip_until(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    end: Option<usize>,
) {
    match end {
        Some(end) => {
            while let Some(&(j, _)) = chars.peek() {
                if j >= end {
                    break;
                }
                chars.next();
            }
        }
        None => {
            // Unterminated construct: consume the remainder.
            while chars.next().is_some() {}
        }
    }
}

/// Decodes the entity at the start of `rest`, returning the replacement
/// and the byte length consumed.
fn decode_entity(rest: &str) -> Option<(&'static str, usize)> {
    const ENTITIES: [(&str, &str); 7] = [
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#039;", "'"),
        ("&#39;", "'"),
        ("&nbsp;", " "),
    ];
    ENTITIES
        .iter()
        .find(|(name, _)| rest.starts_with(name))
        .map(|(name, repl)| (*repl, name.len()))
}

/// Unwraps shortcode delimiters, keeping enclosed content:
/// `[gallery ids="1"]` disappears, `[note]text[/note]` becomes `text`.
/// Double brackets escape a literal bracket, as the host convention has it.
pub fn expand_shortcodes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        if let Some(stripped) = after.strip_prefix('[') {
            // "[[" escapes a literal bracket.
            out.push('[');
            rest = stripped;
            continue;
        }
        match after.find(']') {
            Some(end) => rest = &after[end + 1..],
            None => {
                // Unterminated bracket stays literal.
                out.push('[');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Scans for reusable-block reference comments
/// (`<!-- wp:block {"ref":123} /-->`) and returns the referenced ids in
/// order of appearance.
pub fn block_refs(input: &str) -> Vec<i64> {
    let mut ids = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("<!-- wp:block") {
        let tail = &rest[start..];
        let end = tail.find("-->").map(|p| p + 3).unwrap_or(tail.len());
        if let Some(id) = parse_ref(&tail[..end]) {
            ids.push(id);
        }
        rest = &tail[end..];
    }
    ids
}

/// Replaces each reusable-block reference comment with the referenced
/// document's body (empty when the reference cannot be resolved).
pub fn expand_blocks(input: &str, bodies: &HashMap<i64, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("<!-- wp:block") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail.find("-->").map(|p| p + 3).unwrap_or(tail.len());
        if let Some(body) = parse_ref(&tail[..end]).and_then(|id| bodies.get(&id)) {
            out.push_str(body);
        }
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

fn parse_ref(comment: &str) -> Option<i64> {
    let pos = comment.find("\"ref\":")?;
    let digits: String = comment[pos + 6..]
        .chars()
        .skip_while(|c| c.is_whitespace())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
