//! Per-task-type scoring strategies used by the classifier.
//!
//! Each strategy looks at the lower-cased text, its word set and the file
//! paths mentioned in it, and returns a non-negative score with a reasoning
//! trail. Matching is substring-based unless noted.

use std::collections::BTreeSet;

use crate::core::types::TaskType;

pub const FIX_KEYWORDS: &[&str] = &[
    "fix", "bug", "error", "debug", "issue", "broken", "incorrect", "wrong", "repair", "fail",
    "fails", "failed", "failing", "failure",
];

const WEB_TERMS: &[&str] = &["weather", "news", "search", "google", "price", "stock"];

const FIX_CODE_CONTEXT: &[&str] = &[
    "traceback", "stack", "exception", "test", "tests", "unit test", "log", "logging", "debug",
    "print", "printf", "function", "method", "class", "module", "import", "lint", "format",
    "typing", "type", "edge case", "script", "cli", "tool", "automation", "dashboard", "ui",
    "interface", "api", "service", "app", "workflow", "flow", "pipeline", "scheduler", "cron",
    "report", "reports", "frontend", "backend", "code",
];

const INTENT_KEYWORDS: &[&str] = &["write", "create", "explain", "refactor"];

const GENERATION_KEYWORDS: &[&str] = &[
    "write", "create", "add", "generate", "make", "build", "new", "implement", "complete",
    "finish", "solve",
];

const GENERATION_ARTIFACTS: &[&str] = &[
    "function", "class", "module", "script", "cli", "tool", "automation", "dashboard", "ui",
    "interface", "api", "service", "app", "workflow", "pipeline", "code", "program", "library",
];

const GENERATION_NEGATIVE: &[&str] = &[
    "fix", "bug", "error", "debug", "broken", "wrong", "weather", "news", "search", "google",
    "price", "stock",
];

const REFACTOR_KEYWORDS: &[&str] = &[
    "refactor",
    "redesign",
    "migrate",
    "restructure",
    "rewrite",
    "multiple files",
    "entire",
    "all files",
    "codebase",
];

const EXPLAIN_OR_LOOKUP: &[&str] = &[
    "find",
    "search",
    "locate",
    "usage",
    "used",
    "explain",
    "describe",
    "summarize",
    "summary",
    "what does",
    "how does",
    "tell me about",
];

/// Words that signal logic-level work rather than file shuffling.
const REFACTOR_LANGUAGE: &[&str] = &[
    "behavior",
    "logic",
    "rule",
    "rules",
    "function",
    "method",
    "class",
    "module",
    "code",
    "implementation",
    "cache",
    "caching",
    "log",
    "logs",
    "logging",
    "validation",
    "parsing",
    "processing",
    "handler",
    "workflow",
    "flow",
    "pipeline",
];

const EXPLAIN_KEYWORDS: &[&str] = &[
    "what does",
    "explain",
    "describe",
    "how does",
    "tell me about",
    "what is",
    "summarize",
    "summary",
    "how to use",
];

const LOOKUP_KEYWORDS: &[&str] = &[
    "find",
    "search",
    "locate",
    "usage",
    "used",
    "reference",
    "references",
    "where",
    "who",
    "when",
];

const PROJECT_HINTS: &[&str] = &["project", "codebase", "repo", "repository"];

const MARKET_TERMS: &[&str] = &["weather", "news", "price", "stock"];

const EXPLAIN_CODE_CONTEXT: &[&str] = &[
    "code",
    "function",
    "method",
    "class",
    "module",
    "api",
    "interface",
];

const BROAD_QUESTION_WORDS: &[&str] = &["who", "when", "where", "why", "what"];

/// Phrases that ask for a directory listing.
pub const LISTING_PHRASES: &[&str] = &[
    "list files",
    "list all files",
    "show files",
    "show all files",
    "list directory",
];

/// File-operation verbs and the tool each maps to.
pub const FILE_ACTIONS: &[(&str, &str)] = &[
    ("move", "move_file"),
    ("copy", "copy_file"),
    ("delete", "delete_file"),
    ("remove", "delete_file"),
    ("rename", "move_file"),
];

const FILE_OP_PENALTY_TERMS: &[&str] = &["fix", "bug", "error", "create", "write", "explain"];

const WEB_KEYWORDS: &[&str] = &[
    "weather", "search", "latest", "news", "today", "current", "how is", "what are", "who is",
    "when did", "stock", "price", "market", "google", "find",
];

const WEB_STRONG: &[&str] = &[
    "weather", "news", "price", "stock", "market", "bitcoin", "forecast",
];

const WEB_CODE_CONTEXT: &[&str] = &[
    "code", "script", "function", "class", "module", "api", "cli", "library", "program",
    "dashboard", "ui", "interface", "frontend", "backend",
];

pub const GREETING_KEYWORDS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "yo",
    "sup",
    "thanks",
    "thank you",
    "good morning",
    "good afternoon",
    "good evening",
    "bye",
    "goodbye",
];

const GREETING_NEGATIVE: &[&str] = &[
    "fix", "create", "write", "generate", "explain", "describe", "search", "find", "refactor",
    "move", "delete",
];

/// Normalized view of the task text shared by all strategies.
#[derive(Debug, Clone)]
pub struct ScoreInput<'a> {
    pub text_lower: &'a str,
    pub words: &'a BTreeSet<String>,
    pub detected_files: &'a [String],
    pub has_code_file: bool,
}

impl ScoreInput<'_> {
    fn contains_any(&self, keywords: &[&str]) -> bool {
        contains_any(self.text_lower, keywords)
    }

    fn has_word_from(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|kw| self.words.contains(*kw))
    }

    fn has_files(&self) -> bool {
        !self.detected_files.is_empty()
    }
}

/// Score and reasoning trail for one task type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Score {
    pub value: f64,
    pub reasoning: Vec<String>,
}

impl Score {
    fn add(&mut self, amount: f64, reason: impl Into<String>) {
        self.value += amount;
        self.reasoning.push(reason.into());
    }
}

pub fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// True when `word` appears in `text` delimited by non-word characters.
pub fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Run the strategy for one task type.
pub fn score(task: TaskType, input: &ScoreInput<'_>) -> Score {
    match task {
        TaskType::CodeFix => score_code_fix(input),
        TaskType::CodeGeneration => score_code_generation(input),
        TaskType::Refactor => score_refactor(input),
        TaskType::Explanation => score_explanation(input),
        TaskType::FileOperation => score_file_operation(input),
        TaskType::WebSearch => score_web_search(input),
        TaskType::Greeting => score_greeting(input),
        TaskType::Unknown => Score::default(),
    }
}

fn score_code_fix(input: &ScoreInput<'_>) -> Score {
    let mut score = Score::default();
    let has_fix = input.contains_any(FIX_KEYWORDS);
    if has_fix {
        score.add(0.65, "fix/debug keyword");
        if input.has_files() {
            score.add(0.2, "file hint present");
        }
        if input.has_code_file {
            score.add(0.1, "code context cues");
        }
        if input.contains_any(WEB_TERMS) {
            score.add(0.2, "fix request with web terms");
        }
    }

    let has_code_context = input.has_code_file || input.contains_any(FIX_CODE_CONTEXT);
    let has_explicit_intent = has_fix || input.contains_any(INTENT_KEYWORDS);
    if input.has_files() && has_code_context && !has_explicit_intent {
        score.add(0.3, "file hint with code context");
    }
    score
}

fn score_code_generation(input: &ScoreInput<'_>) -> Score {
    let mut score = Score::default();
    if !input.contains_any(GENERATION_KEYWORDS) {
        return score;
    }
    score.add(0.6, "generation keyword");
    if input.has_files() {
        score.add(0.1, "file hint present");
    }
    if input.text_lower.contains("docstring") || input.text_lower.contains("requirements") {
        score.add(0.05, "explicit requirements");
    }
    if !input.contains_any(GENERATION_NEGATIVE) {
        score.add(0.05, "no fix keywords");
    }
    if !input.has_files() {
        score.add(0.05, "no file hint");
    }
    if input.has_code_file || input.contains_any(GENERATION_ARTIFACTS) {
        score.add(0.15, "code artifact context");
    }
    score
}

fn score_refactor(input: &ScoreInput<'_>) -> Score {
    let mut score = Score::default();
    if input.contains_any(REFACTOR_KEYWORDS) {
        let base = if input.contains_any(EXPLAIN_OR_LOOKUP) {
            0.35
        } else {
            0.7
        };
        score.add(base, "refactor keyword");
        if input.detected_files.len() > 1 {
            score.add(0.1, "multiple files hinted");
        }
    }
    if input.detected_files.len() > 1 && input.contains_any(REFACTOR_LANGUAGE) {
        score.add(0.75, "multi-file refactor cues");
    }
    score
}

fn score_explanation(input: &ScoreInput<'_>) -> Score {
    let mut score = Score::default();
    let broad_question = input.has_word_from(BROAD_QUESTION_WORDS);
    let has_explain = input.contains_any(EXPLAIN_KEYWORDS);
    if has_explain {
        score.add(0.55, "explanation keyword");
        if input.has_files() {
            score.add(0.2, "file hint present");
        }
        if broad_question && input.has_code_file {
            score.add(0.1, "question about code context");
        }
    }

    let lookup = input.contains_any(LOOKUP_KEYWORDS);
    let project_hint = input.contains_any(PROJECT_HINTS);
    if lookup && (project_hint || input.has_code_file || input.has_files()) {
        score.add(0.45, "code lookup request");
    } else if lookup && !input.contains_any(MARKET_TERMS) {
        score.add(0.3, "lookup question without web intent");
    }

    let code_context = input.has_code_file || input.contains_any(EXPLAIN_CODE_CONTEXT);
    if broad_question && code_context && !has_explain {
        score.add(0.35, "broad question with code context");
    }
    score
}

fn score_file_operation(input: &ScoreInput<'_>) -> Score {
    let mut score = Score::default();
    if input.contains_any(LISTING_PHRASES) {
        score.add(0.85, "file listing intent");
        return score;
    }
    if !input.has_files() {
        return score;
    }

    let refactor_language = input.contains_any(REFACTOR_LANGUAGE);
    let code_context = input.has_code_file || refactor_language;
    for (verb, _) in FILE_ACTIONS {
        if !contains_word(input.text_lower, verb) {
            continue;
        }
        let mut penalty: f64 = 0.0;
        if code_context {
            penalty += 0.4;
        }
        if input.contains_any(FILE_OP_PENALTY_TERMS) {
            penalty += 0.2;
        }
        if matches!(*verb, "rename" | "remove") && code_context {
            penalty += 0.2;
        }
        if refactor_language {
            penalty += 0.35;
        }
        if !input.has_code_file {
            penalty = (penalty - 0.4).max(0.0);
        }
        score.add((0.9 - penalty).max(0.0), format!("file operation keyword: {verb}"));
    }
    score
}

fn score_web_search(input: &ScoreInput<'_>) -> Score {
    let mut score = Score::default();
    let no_local_files = !input.has_files() && !input.has_code_file;
    for keyword in WEB_KEYWORDS {
        if input.text_lower.contains(keyword) {
            score.add(0.12, format!("web keyword: {keyword}"));
            if no_local_files {
                score.add(0.08, "no local code context");
            }
        }
    }
    for keyword in WEB_STRONG {
        if input.text_lower.contains(keyword) {
            score.add(0.18, format!("strong web keyword: {keyword}"));
        }
    }

    let has_web = input.contains_any(WEB_KEYWORDS);
    let code_context = input.has_code_file || input.contains_any(WEB_CODE_CONTEXT);
    if has_web && !input.has_files() && !code_context {
        score.add(0.25, "web intent without code context");
    }
    if input.has_word_from(BROAD_QUESTION_WORDS) && !input.has_files() && !code_context {
        score.add(0.2, "broad question without code context");
    }
    score
}

fn score_greeting(input: &ScoreInput<'_>) -> Score {
    let mut score = Score::default();
    let whole = input
        .text_lower
        .trim()
        .trim_end_matches(|ch: char| ch.is_ascii_punctuation());
    let is_greeting = GREETING_KEYWORDS.contains(&whole)
        || (input.words.len() <= 3 && input.has_word_from(GREETING_KEYWORDS));
    if is_greeting {
        score.add(0.4, "greeting keyword");
        if !input.contains_any(GREETING_NEGATIVE) && !input.has_files() {
            score.add(0.3, "no other intent signals");
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(task: TaskType, text: &str, files: &[&str], has_code_file: bool) -> f64 {
        let lower = text.to_lowercase();
        let words: BTreeSet<String> = lower
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .collect();
        let files: Vec<String> = files.iter().map(|f| f.to_string()).collect();
        let input = ScoreInput {
            text_lower: &lower,
            words: &words,
            detected_files: &files,
            has_code_file,
        };
        score(task, &input).value
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn code_fix_with_code_file() {
        let value = run(TaskType::CodeFix, "Fix the bug in app.py", &["app.py"], true);
        assert!(approx(value, 0.95), "{value}");
    }

    #[test]
    fn greeting_short_message() {
        assert!(approx(run(TaskType::Greeting, "Hello!", &[], false), 0.7));
        assert!(approx(
            run(TaskType::Greeting, "hi, fix it", &[], false),
            0.4
        ));
    }

    #[test]
    fn file_operation_penalties_relax_for_non_code_files() {
        let value = run(
            TaskType::FileOperation,
            "move notes.txt to archive/notes.txt",
            &["notes.txt", "archive/notes.txt"],
            false,
        );
        assert!(approx(value, 0.9), "{value}");
        let code = run(
            TaskType::FileOperation,
            "rename utils.py to helpers.py",
            &["utils.py", "helpers.py"],
            true,
        );
        assert!(approx(code, 0.3), "{code}");
    }

    #[test]
    fn listing_phrase_short_circuits() {
        assert!(approx(
            run(TaskType::FileOperation, "list files please", &[], false),
            0.85
        ));
    }

    #[test]
    fn contains_word_respects_boundaries() {
        assert!(contains_word("please move it", "move"));
        assert!(!contains_word("remove it", "move"));
        assert!(!contains_word("movers", "move"));
    }

    #[test]
    fn unknown_never_scores() {
        assert!(approx(run(TaskType::Unknown, "anything at all", &[], false), 0.0));
    }
}
