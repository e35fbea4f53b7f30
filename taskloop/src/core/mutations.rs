//! Structural source mutations used by local repair.
//!
//! Each mutation is a pure text rewrite targeting one common slip: off-by-one
//! ranges, over-eager `continue` guards, stray percentage division, flipped
//! comparisons, truthy loop guards, missing f-string prefixes and 1-based list
//! indexing. Candidates are single mutations plus ordered pairwise compositions.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// A named rewrite of artifact source text.
#[derive(Debug, Clone, Copy)]
pub struct Mutation {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

pub const MUTATIONS: &[Mutation] = &[
    Mutation {
        name: "range_inclusive",
        apply: range_inclusive,
    },
    Mutation {
        name: "remove_continue_guard",
        apply: remove_continue_guard,
    },
    Mutation {
        name: "remove_div_100",
        apply: remove_div_100,
    },
    Mutation {
        name: "swap_comparison",
        apply: swap_comparison,
    },
    Mutation {
        name: "strengthen_loop_guard",
        apply: strengthen_loop_guard,
    },
    Mutation {
        name: "add_fstring_prefix",
        apply: add_fstring_prefix,
    },
    Mutation {
        name: "list_index_offset",
        apply: list_index_offset,
    },
];

/// One distinct mutated source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Mutation names joined with `+` in application order.
    pub label: String,
    pub source: String,
}

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\brange\(([^,]+),\s*([^)]+)\)").unwrap());
static IF_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)if\s+(.+):\s*$").unwrap());
static CONTINUE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s+)continue\b").unwrap());
static PAREN_DIV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]+?)\s*/\s*100(?:\.0+)?\)").unwrap());
static IDENT_DIV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*/\s*100(?:\.0+)?\b").unwrap());
static WHILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bwhile\s+([a-z_]\w*)\s*:").unwrap());
static DOUBLE_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([^"\n]*)""#).unwrap());
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[a-zA-Z_]\w*\}").unwrap());
static INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([a-zA-Z_]\w*)\]").unwrap());

/// `range(a, b)` becomes `range(a, b + 1)` unless already inclusive.
pub fn range_inclusive(text: &str) -> String {
    RANGE_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let start = caps[1].trim();
            let end = caps[2].trim();
            if end.ends_with("+ 1") || end.ends_with("+1") {
                caps[0].to_string()
            } else {
                format!("range({start}, {end} + 1)")
            }
        })
        .into_owned()
}

/// An `if cond:` whose body is a lone `continue` gets `pass` instead.
pub fn remove_continue_guard(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx];
        out.push(line.to_string());
        if let (Some(guard), Some(next)) = (IF_LINE_RE.captures(line), lines.get(idx + 1))
            && let Some(body) = CONTINUE_LINE_RE.captures(next)
        {
            let indent = &guard[1];
            let body_indent = &body[1];
            if body_indent.len() > indent.len() && body_indent.starts_with(indent) {
                out.push(format!("{indent}    pass{}", &next[body[0].len()..]));
                idx += 2;
                continue;
            }
        }
        idx += 1;
    }
    out.join("\n")
}

/// Drop `/ 100` from parenthesized expressions and plain identifiers.
pub fn remove_div_100(text: &str) -> String {
    let step = PAREN_DIV_RE.replace_all(text, "$1");
    IDENT_DIV_RE.replace_all(&step, "$1").into_owned()
}

/// Flip `>=`/`>` (or, when no `>` comparison exists, `<=`/`<`).
pub fn swap_comparison(text: &str) -> String {
    let swapped = flip_operator(text, '>', '<');
    if swapped != text {
        return swapped;
    }
    flip_operator(text, '<', '>')
}

fn flip_operator(text: &str, op: char, opposite: char) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        if ch != op {
            out.push(ch);
            idx += 1;
            continue;
        }
        let prev = idx.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(idx + 1).copied();
        let is_arrow_or_shift = matches!(prev, Some('-') | Some('=')) && op == '>'
            || prev == Some(op)
            || next == Some(op)
            || prev == Some(opposite);
        if is_arrow_or_shift {
            out.push(ch);
            idx += 1;
        } else if next == Some('=') {
            out.push(op);
            idx += 2;
        } else {
            out.push(op);
            out.push('=');
            idx += 1;
        }
    }
    out
}

/// `while n:` becomes `while n > 0:`.
pub fn strengthen_loop_guard(text: &str) -> String {
    WHILE_RE.replace_all(text, "while ${1} > 0:").into_owned()
}

/// Prefix `f` to double-quoted strings containing `{name}` placeholders.
pub fn add_fstring_prefix(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut last = 0;
    for found in DOUBLE_QUOTED_RE.find_iter(text) {
        let inner = &found.as_str()[1..found.as_str().len() - 1];
        let prefixed = text[..found.start()]
            .chars()
            .next_back()
            .is_some_and(|ch| ch.is_ascii_alphabetic());
        out.push_str(&text[last..found.start()]);
        if !prefixed && PLACEHOLDER_RE.is_match(inner) {
            out.push('f');
        }
        out.push_str(found.as_str());
        last = found.end();
    }
    out.push_str(&text[last..]);
    out
}

/// `xs[i]` becomes `xs[i - 1]`.
pub fn list_index_offset(text: &str) -> String {
    INDEX_RE.replace_all(text, "[${1} - 1]").into_owned()
}

/// Build deduplicated candidates: each applicable mutation, then each ordered
/// pair (i < j) where the second mutation changes the first one's output.
pub fn generate_candidates(original: &str) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(original.to_string());
    let mut candidates = Vec::new();

    let singles: Vec<Option<String>> = MUTATIONS
        .iter()
        .map(|mutation| {
            let updated = (mutation.apply)(original);
            (updated != original).then_some(updated)
        })
        .collect();

    for (mutation, single) in MUTATIONS.iter().zip(&singles) {
        if let Some(source) = single
            && seen.insert(source.clone())
        {
            candidates.push(Candidate {
                label: mutation.name.to_string(),
                source: source.clone(),
            });
        }
    }

    for (i, first) in MUTATIONS.iter().enumerate() {
        let Some(first_out) = &singles[i] else {
            continue;
        };
        for second in &MUTATIONS[i + 1..] {
            let composed = (second.apply)(first_out);
            if composed != *first_out && seen.insert(composed.clone()) {
                candidates.push(Candidate {
                    label: format!("{}+{}", first.name, second.name),
                    source: composed,
                });
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_becomes_inclusive_once() {
        assert_eq!(
            range_inclusive("for i in range(1, n):"),
            "for i in range(1, n + 1):"
        );
        assert_eq!(
            range_inclusive("for i in range(1, n + 1):"),
            "for i in range(1, n + 1):"
        );
    }

    #[test]
    fn continue_guard_becomes_pass() {
        let src = "for x in xs:\n    if x < 0:\n        continue\n    total += x\n";
        assert_eq!(
            remove_continue_guard(src),
            "for x in xs:\n    if x < 0:\n        pass\n    total += x\n"
        );
    }

    #[test]
    fn div_100_is_removed() {
        assert_eq!(remove_div_100("rate = (pct / 100)"), "rate = pct");
        assert_eq!(remove_div_100("rate = pct / 100.0"), "rate = pct");
    }

    #[test]
    fn comparison_swap_prefers_greater_than() {
        assert_eq!(swap_comparison("if a >= b and c > d:"), "if a > b and c >= d:");
        assert_eq!(swap_comparison("if a <= b:"), "if a < b:");
        assert_eq!(swap_comparison("def f() -> int: return x >> 1"), "def f() -> int: return x >> 1");
    }

    #[test]
    fn loop_guard_and_fstring_and_index() {
        assert_eq!(strengthen_loop_guard("while n:"), "while n > 0:");
        assert_eq!(
            add_fstring_prefix(r#"print("Hello {name}")"#),
            r#"print(f"Hello {name}")"#
        );
        assert_eq!(
            add_fstring_prefix(r#"print(f"Hello {name}")"#),
            r#"print(f"Hello {name}")"#
        );
        assert_eq!(list_index_offset("xs[i]"), "xs[i - 1]");
    }

    #[test]
    fn candidates_are_unique_and_exclude_original() {
        let src = "for i in range(1, n):\n    if xs[i] >= 3:\n        print(i)\n";
        let candidates = generate_candidates(src);
        let labels: Vec<&str> = candidates.iter().map(|c| c.label.as_str()).collect();
        assert!(labels.contains(&"range_inclusive"));
        assert!(labels.contains(&"swap_comparison"));
        assert!(labels.contains(&"range_inclusive+swap_comparison"));
        let unique: HashSet<&String> = candidates.iter().map(|c| &c.source).collect();
        assert_eq!(unique.len(), candidates.len());
        assert!(candidates.iter().all(|c| c.source != src));
    }

    #[test]
    fn already_clean_source_has_no_candidates() {
        assert!(generate_candidates("print('The Lord of the Rings')\n").is_empty());
    }
}
