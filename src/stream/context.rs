//! Prompt assembly: the long-term memory note and history budgeting.

use crate::engine::{Role, Turn};
use crate::memory_types::RetrievedMemory;
use crate::text::{estimate_tokens, strip_reasoning_tags};

/// Header of the block listing retrieved memories.
pub const MEMORY_NOTE_HEADER: &str = "[SYSTEM NOTE: The following are historical interaction logs \
retrieved from Long-Term Memory. Use them to understand context, track name changes, and recall \
the Human's facts.]";

/// Label shown for memories stored without tags.
const UNTAGGED_LABEL: &str = "general";

/// Share of the context window kept free for the reply.
const REPLY_RESERVE_DIVISOR: usize = 4;

/// The memory note, or `None` when nothing was retrieved.
pub fn memory_note(memories: &[RetrievedMemory]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }
    let lines: Vec<String> = memories
        .iter()
        .map(|m| {
            let tags = if m.tags.is_empty() {
                UNTAGGED_LABEL.to_string()
            } else {
                m.tags.join(",")
            };
            format!("- [{}] {}", tags, m.text)
        })
        .collect();
    Some(format!("{}\n{}", MEMORY_NOTE_HEADER, lines.join("\n")))
}

/// The text sent to the engine for this turn.
pub fn compose_prompt(memories: &[RetrievedMemory], user_text: &str) -> String {
    match memory_note(memories) {
        Some(note) => format!("{}\n\nHuman: {}", note, user_text),
        None => format!("Human: {}", user_text),
    }
}

/// Keep the newest turns that fit the context window.
///
/// A quarter of the window is reserved for the reply and `reserved_tokens` for
/// the current prompt. Reasoning blocks are removed from assistant turns first,
/// since they are never useful as history. Turns are kept in their original order.
pub fn fit_history(turns: Vec<Turn>, context_tokens: u32, reserved_tokens: usize) -> Vec<Turn> {
    let window = context_tokens as usize;
    let mut budget = window
        .saturating_sub(window / REPLY_RESERVE_DIVISOR)
        .saturating_sub(reserved_tokens);

    let mut kept: Vec<Turn> = Vec::new();
    for mut turn in turns.into_iter().rev() {
        if turn.role == Role::Assistant {
            turn.text = strip_reasoning_tags(&turn.text);
        }
        let cost = estimate_tokens(&turn.text).max(1);
        if cost > budget {
            break;
        }
        budget -= cost;
        kept.push(turn);
    }
    kept.reverse();

    // A history should not open mid-exchange with a reply.
    while kept.first().is_some_and(|t| t.role == Role::Assistant) {
        kept.remove(0);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(text: &str, tags: &[&str]) -> RetrievedMemory {
        RetrievedMemory {
            id: 1,
            text: text.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            persona: "Global".to_string(),
            created_at: 0,
            distance: 0.1,
        }
    }

    #[test]
    fn test_compose_without_memories_has_no_note() {
        let prompt = compose_prompt(&[], "Hello there");
        assert_eq!(prompt, "Human: Hello there");
        assert!(!prompt.contains("SYSTEM NOTE"));
    }

    #[test]
    fn test_compose_with_memories() {
        let memories = vec![
            memory("The Human loves oat milk.", &["food", "prefs"]),
            memory("The Human is called Sam.", &[]),
        ];
        let prompt = compose_prompt(&memories, "What milk do I like?");
        let expected = format!(
            "{}\n- [food,prefs] The Human loves oat milk.\n- [general] The Human is called Sam.\n\nHuman: What milk do I like?",
            MEMORY_NOTE_HEADER
        );
        assert_eq!(prompt, expected);
    }

    #[test]
    fn test_fit_history_keeps_everything_when_small() {
        let turns = vec![Turn::user("hi"), Turn::assistant("hello")];
        assert_eq!(fit_history(turns.clone(), 4096, 10), turns);
    }

    #[test]
    fn test_fit_history_drops_oldest_first() {
        let long = "x".repeat(400); // ~100 tokens
        let turns = vec![
            Turn::user(long.clone()),
            Turn::assistant(long.clone()),
            Turn::user(long.clone()),
            Turn::assistant("short"),
        ];
        // Window 400 tokens: 300 usable, minus 50 reserved leaves 250.
        let kept = fit_history(turns, 400, 50);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].role, Role::User);
        assert_eq!(kept[1].text, "short");
    }

    #[test]
    fn test_fit_history_strips_reasoning() {
        let turns = vec![
            Turn::user("q"),
            Turn::assistant("<think>long internal monologue</think>Answer."),
        ];
        let kept = fit_history(turns, 4096, 0);
        assert_eq!(kept[1].text, "Answer.");
    }

    #[test]
    fn test_fit_history_zero_budget() {
        let turns = vec![Turn::user("hello")];
        assert!(fit_history(turns, 8, 100).is_empty());
    }
}
