//! System prompt composition per chat mode.

/// Build the system prompt injected ahead of conversation history.
/// Kept lean to reduce token overhead given the small context windows of
/// the talker/worker tiers.
pub fn system_prompt(mode: &str) -> String {
    let base = "You are the assistant behind an AI agent control plane. \
                Keep replies concise, accurate, and actionable. Use tools when helpful.";

    let mode_notes = match mode {
        "mcp" => "\n\nYou are operating in MCP tool-dispatch mode: prefer emitting a \
                  ```tool_call``` block over describing what you would do.",
        "debug" => "\n\nYou are operating in debug mode: include brief reasoning before \
                    your answer, and call out any assumptions you made.",
        "ai" => "\n\nYou are operating in AI-intelligence mode: responses may be consumed \
                 by another automated system, so prefer structured, literal language.",
        _ => "",
    };

    format!("{base}{mode_notes}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_mode_has_no_extra_notes() {
        assert!(!system_prompt("general").contains("tool-dispatch"));
    }

    #[test]
    fn mcp_mode_mentions_tool_call() {
        assert!(system_prompt("mcp").contains("tool_call"));
    }
}
