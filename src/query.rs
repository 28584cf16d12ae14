//! Boolean-mode query compilation.
//!
//! One shared tokenizer turns a raw user search string into a token
//! stream; per-dialect emitters then render the boolean-mode syntax each
//! full-text engine accepts. Inputs are never rejected: degenerate
//! strings (unbalanced quotes or parentheses) degrade to best-effort
//! output, since end users cannot be expected to write well-formed
//! boolean syntax.

use crate::config::Dialect;

/// Polarity markers the engines understand; terms already carrying one
/// are emitted verbatim.
const POLARITY_PREFIXES: [char; 4] = ['+', '-', '~', '@'];

/// A parse unit produced by the tokenizer. Consumed once, not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryToken {
    /// A word or quoted phrase, quotes included as typed.
    Term {
        text: String,
        /// Set on both sides of an `OR`; optional terms are emitted
        /// without a required-`+` prefix.
        optional: bool,
    },
    Open,
    Close,
}

/// Compiles a raw search string into the given dialect. Returns an empty
/// string for an empty (post-trim) input; callers must not invoke
/// fulltext matching in that case.
pub fn compile(input: &str, dialect: Dialect, weight_directive: &str) -> String {
    let tokens = tokenize(input);
    if tokens.is_empty() {
        return String::new();
    }
    match dialect {
        Dialect::Mroonga => {
            let body = emit_plain(&tokens);
            format!("{} {}", weight_directive, body)
        }
        Dialect::Ngram => emit_boolean(&tokens),
    }
}

/// Shared first pass over the Unicode character sequence.
///
/// A `"` toggles phrase mode, during which spaces and parentheses are
/// taken literally. Outside quotes a space flushes the word buffer
/// (discarding empty buffers), a full-width space counts as a space, and
/// `(`/`)` are emitted as standalone grouping tokens. The literal words
/// `OR` and `AND` are consumed as operators instead of becoming terms:
/// `OR` makes the terms on both of its sides optional, `AND` restores
/// the default required polarity. An unterminated quote stays in phrase
/// mode through end of input; end of input closes the final buffer
/// regardless, so the accumulated phrase is still emitted.
pub fn tokenize(input: &str) -> Vec<QueryToken> {
    let mut tokens: Vec<QueryToken> = Vec::new();
    let mut word = String::new();
    let mut in_quotes = false;
    let mut or_pending = false;

    // Mark the term before an OR as optional, once the OR's scope is
    // confirmed by a following term or ended by a grouping boundary.
    fn demote_last(tokens: &mut [QueryToken]) {
        if let Some(QueryToken::Term { optional, .. }) = tokens.last_mut() {
            *optional = true;
        }
    }

    for c in input.chars() {
        let c = if c == '\u{3000}' && !in_quotes { ' ' } else { c };

        if c == ' ' && !in_quotes {
            match word.as_str() {
                "OR" => or_pending = true,
                "AND" => or_pending = false,
                "" => {}
                _ => {
                    if or_pending {
                        demote_last(&mut tokens);
                    }
                    tokens.push(QueryToken::Term {
                        text: std::mem::take(&mut word),
                        optional: or_pending,
                    });
                    or_pending = false;
                }
            }
            word.clear();
        } else if (c == '(' || c == ')') && !in_quotes {
            // Flush the pending buffer, then end any OR scope at the
            // grouping boundary. Operator keywords flushed here stay
            // literal terms; they are only recognized standalone.
            if !word.is_empty() {
                if or_pending {
                    demote_last(&mut tokens);
                }
                tokens.push(QueryToken::Term {
                    text: std::mem::take(&mut word),
                    optional: or_pending,
                });
            } else if or_pending {
                demote_last(&mut tokens);
            }
            or_pending = false;
            tokens.push(if c == '(' {
                QueryToken::Open
            } else {
                QueryToken::Close
            });
        } else {
            word.push(c);
            if c == '"' {
                in_quotes = !in_quotes;
            }
        }
    }

    // End of input closes the final buffer even inside an open phrase.
    match word.as_str() {
        "OR" | "AND" | "" => {}
        _ => {
            if or_pending {
                demote_last(&mut tokens);
            }
            tokens.push(QueryToken::Term {
                text: word,
                optional: or_pending,
            });
        }
    }

    tokens
}

/// Joins tokens with single spaces, polarity marking unchanged. The
/// mroonga-style engine's own parser treats bare terms as required, so
/// no `+` rewriting is needed.
fn emit_plain(tokens: &[QueryToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            QueryToken::Term { text, .. } => {
                push_separated(&mut out, text);
            }
            QueryToken::Open => push_group_open(&mut out),
            QueryToken::Close => out.push(')'),
        }
    }
    out
}

/// ngram/InnoDB boolean mode: every term not already carrying a polarity
/// prefix is made required with `+`, except optional (OR-joined) terms,
/// which stay unmarked on both sides.
fn emit_boolean(tokens: &[QueryToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            QueryToken::Term { text, optional } => {
                let verbatim = text
                    .chars()
                    .next()
                    .map(|c| POLARITY_PREFIXES.contains(&c))
                    .unwrap_or(false);
                if verbatim || *optional {
                    push_separated(&mut out, text);
                } else {
                    push_separated(&mut out, "+");
                    out.push_str(text);
                }
            }
            QueryToken::Open => push_group_open(&mut out),
            QueryToken::Close => out.push(')'),
        }
    }
    out
}

fn push_separated(out: &mut String, s: &str) {
    if !out.is_empty() && !out.ends_with('(') {
        out.push(' ');
    }
    out.push_str(s);
}

fn push_group_open(out: &mut String) {
    if !out.is_empty() && !out.ends_with('(') {
        out.push(' ');
    }
    out.push('(');
}
