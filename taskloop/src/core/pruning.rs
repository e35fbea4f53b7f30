//! Context pruning: keep the task and the recent attempt/failure pairs.

use crate::core::state::Message;

/// Compress `messages` to the first human message plus the last `max_pairs`
/// (assistant attempt, verification feedback) pairs, in chronological order.
///
/// Tool chatter and older pairs are dropped. A feedback message with no
/// attempt since the previous feedback is kept on its own.
pub fn prune_messages(messages: &[Message], max_pairs: usize) -> Vec<Message> {
    let task = messages
        .iter()
        .position(|msg| matches!(msg, Message::Human { .. }));

    let mut pairs: Vec<(Option<usize>, usize)> = Vec::new();
    let mut pending_attempt: Option<usize> = None;
    for (idx, msg) in messages.iter().enumerate() {
        match msg {
            Message::Assistant { .. } => pending_attempt = Some(idx),
            Message::Feedback { .. } => pairs.push((pending_attempt.take(), idx)),
            _ => {}
        }
    }
    let skip = pairs.len().saturating_sub(max_pairs);

    let mut kept: Vec<Message> = Vec::new();
    if let Some(idx) = task {
        kept.push(messages[idx].clone());
    }
    for (attempt, feedback) in pairs.into_iter().skip(skip) {
        if let Some(idx) = attempt {
            kept.push(messages[idx].clone());
        }
        kept.push(messages[feedback].clone());
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ToolOutput;
    use serde_json::{Map, Value};

    fn tool_result() -> Message {
        Message::ToolResult(ToolOutput {
            tool: "read_file".to_string(),
            args: Map::new(),
            output: Value::String("body".to_string()),
            error: None,
        })
    }

    #[test]
    fn keeps_task_and_recent_pairs_in_order() {
        let mut messages = vec![Message::human("Fix main.py")];
        for round in 0..7 {
            messages.push(tool_result());
            messages.push(Message::assistant(format!("attempt {round}")));
            messages.push(Message::feedback(format!("failure {round}")));
        }
        let pruned = prune_messages(&messages, 5);
        assert_eq!(pruned.len(), 11);
        assert_eq!(pruned[0], Message::human("Fix main.py"));
        assert_eq!(pruned[1], Message::assistant("attempt 2"));
        assert_eq!(pruned[2], Message::feedback("failure 2"));
        assert_eq!(pruned[10], Message::feedback("failure 6"));
        assert!(pruned.iter().all(|msg| !matches!(msg, Message::ToolResult(_))));
    }

    #[test]
    fn feedback_without_attempt_is_kept_alone() {
        let messages = vec![
            Message::human("task"),
            Message::feedback("first failure"),
            Message::assistant("attempt"),
            Message::feedback("second failure"),
        ];
        let pruned = prune_messages(&messages, 5);
        assert_eq!(pruned, messages);
    }

    #[test]
    fn never_reorders_survivors() {
        let messages = vec![
            Message::human("task"),
            Message::assistant("a"),
            Message::system("note"),
            Message::feedback("f"),
        ];
        let pruned = prune_messages(&messages, 1);
        assert_eq!(
            pruned,
            vec![
                Message::human("task"),
                Message::assistant("a"),
                Message::feedback("f")
            ]
        );
    }
}
