//! Prompt assembly for the answering call.

use crate::llm::ChatMessage;

/// Assemble the single user message: instruction core, numbered
/// fragments, then the question. Fragment numbers are 1-based and are
/// what the model cites as `[n]`.
pub fn build_prompt(chunks: &[String], prompt_core: &str, question: &str) -> ChatMessage {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk))
        .collect::<Vec<_>>()
        .join("\n\n");

    ChatMessage::user(format!(
        "{}\nFragmenty:\n{}\n\nPytanie:\n{}",
        prompt_core, context, question
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_are_numbered_from_one() {
        let chunks = vec!["pierwszy fragment".to_string(), "drugi fragment".to_string()];
        let message = build_prompt(&chunks, "Odpowiedz na pytanie.", "co to jest?");
        assert!(message.content.contains("[1] pierwszy fragment"));
        assert!(message.content.contains("[2] drugi fragment"));
        assert!(message.content.ends_with("Pytanie:\nco to jest?"));
        assert_eq!(message.role, "user");
    }

    #[test]
    fn test_empty_chunks_still_produce_prompt() {
        let message = build_prompt(&[], "Rdzeń.", "pytanie?");
        assert!(message.content.starts_with("Rdzeń.\nFragmenty:\n"));
    }
}
