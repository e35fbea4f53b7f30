//! Deterministic pattern classifier.
//!
//! Maps task text to a ranked set of task-type candidates without any model
//! call. Identical input always yields an identical result.

use std::collections::BTreeSet;

use crate::core::paths::{extract_file_paths, is_code_file};
use crate::core::scoring::{FILE_ACTIONS, LISTING_PHRASES, ScoreInput, contains_any, contains_word, score};
use crate::core::state::ConversationState;
use crate::core::types::{Candidate, ClassificationResult, TaskType};

/// Characters considered when discounting long inputs.
const BACKOFF_WINDOW_CHARS: usize = 200;

/// Classify the most recent human message in the conversation.
pub fn classify(state: &ConversationState) -> ClassificationResult {
    classify_text(state.last_human().unwrap_or(""))
}

/// Confidence discount for longer inputs: `0.95^(len/100)` over the first 200 chars.
pub fn confidence_backoff(text: &str) -> f64 {
    let len = text.chars().take(BACKOFF_WINDOW_CHARS).count();
    if len == 0 {
        return 1.0;
    }
    0.95_f64.powf(len as f64 / 100.0)
}

fn to_confidence(score: f64, backoff: f64) -> f64 {
    (0.4 + score * 0.5).min(0.95) * backoff
}

/// Lower-cased words with surrounding punctuation stripped.
pub fn word_set(text_lower: &str) -> BTreeSet<String> {
    text_lower
        .split_whitespace()
        .map(|word| word.trim_matches(|ch: char| !ch.is_alphanumeric() && ch != '_'))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn classify_text(text: &str) -> ClassificationResult {
    let text = text.trim();
    if text.is_empty() {
        return ClassificationResult {
            task_type: TaskType::Unknown,
            confidence: 0.4,
            detected_files: Vec::new(),
            detected_action: None,
            reasoning: "No user message found".to_string(),
            candidates: build_candidates(&[], 1.0),
        };
    }

    let text_lower = text.to_lowercase();
    let words = word_set(&text_lower);
    let detected_files = extract_file_paths(text);
    let has_code_file = detected_files.iter().any(|path| is_code_file(path));
    let backoff = confidence_backoff(text);

    let input = ScoreInput {
        text_lower: &text_lower,
        words: &words,
        detected_files: &detected_files,
        has_code_file,
    };
    let scored: Vec<(TaskType, f64, Vec<String>)> = TaskType::ALL
        .iter()
        .map(|task| {
            let result = score(*task, &input);
            (*task, result.value, result.reasoning)
        })
        .collect();

    let best = scored.iter().fold(None::<&(TaskType, f64, Vec<String>)>, |best, entry| {
        match best {
            Some(current)
                if (current.1, current.0.priority()) >= (entry.1, entry.0.priority()) =>
            {
                Some(current)
            }
            _ => Some(entry),
        }
    });
    let candidates = build_candidates(&scored, backoff);

    let Some((best_task, best_score, best_reasons)) = best else {
        return unknown(detected_files, candidates);
    };
    if *best_score <= 0.0 {
        return unknown(detected_files, candidates);
    }

    let confidence = candidates
        .iter()
        .find(|candidate| candidate.task_type == *best_task)
        .map_or(0.4, |candidate| candidate.confidence);
    let reasoning = if best_reasons.is_empty() {
        "No clear pattern matched".to_string()
    } else {
        best_reasons.join("; ")
    };

    ClassificationResult {
        task_type: *best_task,
        confidence,
        detected_action: detected_action(*best_task, &text_lower, &detected_files),
        detected_files,
        reasoning,
        candidates,
    }
}

fn unknown(detected_files: Vec<String>, candidates: Vec<Candidate>) -> ClassificationResult {
    ClassificationResult {
        task_type: TaskType::Unknown,
        confidence: 0.0,
        detected_files,
        detected_action: None,
        reasoning: "No clear pattern matched".to_string(),
        candidates,
    }
}

fn build_candidates(scored: &[(TaskType, f64, Vec<String>)], backoff: f64) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = TaskType::ALL
        .iter()
        .map(|task| {
            let (score, reasoning) = scored
                .iter()
                .find(|(scored_task, _, _)| scored_task == task)
                .map_or((0.0, Vec::new()), |(_, score, reasons)| {
                    (*score, reasons.clone())
                });
            Candidate {
                task_type: *task,
                score,
                confidence: to_confidence(score, backoff),
                reasoning,
            }
        })
        .collect();
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates
}

fn detected_action(task: TaskType, text_lower: &str, detected_files: &[String]) -> Option<String> {
    match task {
        TaskType::Greeting => Some("respond".to_string()),
        TaskType::FileOperation => {
            if contains_any(text_lower, LISTING_PHRASES) {
                return Some("list_files".to_string());
            }
            FILE_ACTIONS
                .iter()
                .find(|(verb, _)| contains_word(text_lower, verb))
                .map(|(_, tool)| (*tool).to_string())
        }
        TaskType::Explanation => (!detected_files.is_empty()).then(|| "read_file".to_string()),
        TaskType::WebSearch => Some("web_search".to_string()),
        _ => Some("delegate".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CONFIDENT_THRESHOLD;

    #[test]
    fn greeting_is_confident() {
        let result = classify_text("Hello!");
        assert_eq!(result.task_type, TaskType::Greeting);
        assert!(result.confidence >= 0.7, "{}", result.confidence);
        assert_eq!(result.detected_action.as_deref(), Some("respond"));
    }

    #[test]
    fn fix_with_file_is_code_fix() {
        let result = classify_text("Fix the bug in app.py");
        assert_eq!(result.task_type, TaskType::CodeFix);
        assert_eq!(result.detected_files, vec!["app.py".to_string()]);
        assert!(result.confidence >= CONFIDENT_THRESHOLD);
        assert_eq!(result.detected_action.as_deref(), Some("delegate"));
    }

    #[test]
    fn fix_without_file_is_not_confident_enough_to_read() {
        let result = classify_text("Fix the failing tests");
        assert_eq!(result.task_type, TaskType::CodeFix);
        assert!(result.detected_files.is_empty());
    }

    #[test]
    fn explain_with_file_reads_it() {
        let result = classify_text("Explain what utils.py does");
        assert_eq!(result.task_type, TaskType::Explanation);
        assert_eq!(result.detected_action.as_deref(), Some("read_file"));
    }

    #[test]
    fn listing_request_maps_to_list_files() {
        let result = classify_text("list files in the repo");
        assert_eq!(result.task_type, TaskType::FileOperation);
        assert_eq!(result.detected_action.as_deref(), Some("list_files"));
    }

    #[test]
    fn empty_message_is_unknown_baseline() {
        let result = classify_text("   ");
        assert_eq!(result.task_type, TaskType::Unknown);
        assert!((result.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn nonsense_is_unknown_with_zero_confidence() {
        let result = classify_text("qwerty zxcvb");
        assert_eq!(result.task_type, TaskType::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.candidates.len(), TaskType::ALL.len());
    }

    #[test]
    fn longer_text_backs_off_confidence() {
        assert_eq!(confidence_backoff(""), 1.0);
        let long = "x".repeat(500);
        let capped = confidence_backoff(&long);
        assert!((capped - 0.95_f64.powf(2.0)).abs() < 1e-12);
    }

    #[test]
    fn classification_is_deterministic() {
        let text = "Refactor the caching logic across cache.py and store.py";
        let first = classify_text(text);
        for _ in 0..10 {
            assert_eq!(classify_text(text), first);
        }
        assert_eq!(first.task_type, TaskType::Refactor);
    }
}
