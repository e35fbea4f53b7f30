//! File-path recognition over free text and path lists.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Extensions that make a bare token count as a file mention.
const MENTION_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "html", "css", "txt", "py", "js", "ts", "md", "rs", "go", "java", "sh",
    "toml",
];

/// Extensions treated as source code.
const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "go", "rs", "java", "rb", "php", "cs", "cpp", "c", "h", "hpp",
    "swift", "kt", "sh",
];

const EDGE_PUNCTUATION: &[char] = &[
    '.', ',', ':', ';', '(', ')', '[', ']', '{', '}', '!', '?', '"', '\'', '`',
];

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|'([^']+)'|`([^`]+)`"#).expect("quoted regex"));

static TRAILING_EXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[A-Za-z0-9]{1,5}$").expect("extension regex"));

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// True when the path names a source-code file.
pub fn is_code_file(path: &str) -> bool {
    extension(path).is_some_and(|ext| CODE_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_python_file(path: &str) -> bool {
    extension(path).is_some_and(|ext| ext == "py")
}

/// Heuristic: does this token look like a file path?
pub fn looks_like_path(token: &str) -> bool {
    token.starts_with('@')
        || token.contains('/')
        || token.contains('\\')
        || TRAILING_EXT_RE.is_match(token)
}

fn clean_token(token: &str) -> &str {
    token.trim_matches(EDGE_PUNCTUATION)
}

fn mentions_known_extension(token: &str) -> bool {
    extension(token).is_some_and(|ext| MENTION_EXTENSIONS.contains(&ext.as_str()))
}

/// Extract file paths mentioned in text, in first-seen order without duplicates.
///
/// Recognizes `@path` tokens, tokens with a known extension, and quoted strings
/// that contain `/` or `.`. A leading `@` is stripped.
pub fn extract_file_paths(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim_start_matches('@');
        if !candidate.is_empty() && !found.iter().any(|existing| existing == candidate) {
            found.push(candidate.to_string());
        }
    };

    for raw in text.split(|ch: char| ch.is_whitespace() || ch == ',') {
        let token = clean_token(raw);
        if token.is_empty() {
            continue;
        }
        if token.starts_with('@') || mentions_known_extension(token) {
            push(token);
        }
    }

    for caps in QUOTED_RE.captures_iter(text) {
        let Some(quoted) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let quoted = quoted.as_str();
        if !(quoted.contains('/') || quoted.contains('.')) {
            continue;
        }
        if quoted.chars().any(char::is_whitespace) {
            for token in quoted.split_whitespace() {
                let cleaned = clean_token(token);
                if looks_like_path(cleaned) {
                    push(cleaned);
                }
            }
        } else {
            push(quoted);
        }
    }

    found
}

/// True for conventional test file locations across common ecosystems.
pub fn is_test_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or(&normalized);
    if name.ends_with(".py") && (name.starts_with("test_") || name.ends_with("_test.py")) {
        return true;
    }
    if name.ends_with("_test.rs") || name.ends_with(".test.js") || name.ends_with(".spec.ts") {
        return true;
    }
    normalized
        .split('/')
        .rev()
        .skip(1)
        .any(|component| component == "test" || component == "tests")
}

/// Number of path separators, used as a depth measure.
pub fn depth(path: &str) -> usize {
    path.matches(['/', '\\']).count()
}
